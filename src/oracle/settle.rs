use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::OracleError;

/// Result of a single look at the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The surface shows a settled value.
    Ready(T),
    /// Not settled yet; carries whatever partial value was seen.
    Pending(Option<T>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome<T> {
    Settled(T),
    /// The bound elapsed. Holds the last partial value, if any.
    TimedOut(Option<T>),
}

impl<T> SettleOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            SettleOutcome::Settled(value) => Some(value),
            SettleOutcome::TimedOut(last) => last,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, SettleOutcome::Settled(_))
    }
}

/// Bounded polling used after a selection, while the page updates asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleWait {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl SettleWait {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            timeout,
        }
    }

    pub fn from_millis(poll_interval_ms: u64, timeout_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(poll_interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    /// Poll `probe` until it reports `Ready` or the timeout elapses.
    /// The probe always runs at least once. Probe errors end the wait immediately.
    pub async fn wait_for<T, F>(&self, mut probe: F) -> Result<SettleOutcome<T>, OracleError>
    where
        F: FnMut() -> Result<Probe<T>, OracleError>,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut last = None;

        loop {
            match probe()? {
                Probe::Ready(value) => {
                    tracing::trace!("settled after {:?}", started.elapsed());
                    return Ok(SettleOutcome::Settled(value));
                }
                Probe::Pending(partial) => {
                    if partial.is_some() {
                        last = partial;
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("surface did not settle within {:?}", self.timeout);
                return Ok(SettleOutcome::TimedOut(last));
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

impl Default for SettleWait {
    fn default() -> Self {
        Self::from_millis(60, 800)
    }
}
