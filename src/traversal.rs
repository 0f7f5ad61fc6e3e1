//! Drives an [`Oracle`] through every combination of a product model.
//!
//! Each combination moves through `Pending -> Selecting -> Reading` and ends
//! `Recorded` or `Skipped`, possibly passing through `Retrying` first. Only the
//! dimensions that differ from the believed surface state are re-applied.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, FixedInterval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::aggregator::ImageTable;
use crate::config::TraversalConfig;
use crate::generator::CombinationGenerator;
use crate::models::{Combination, CombinationResult, CombinationStatus, ProductModel, Selection};
use crate::oracle::{Availability, Oracle, OracleError};
use crate::pricing::normalize_price;
use crate::utils::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalOptions {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub max_combinations: Option<usize>,
    /// Base delay between combinations; the actual delay is jittered around it.
    pub pace: Duration,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(250),
            max_combinations: None,
            pace: Duration::ZERO,
        }
    }
}

impl From<&TraversalConfig> for TraversalOptions {
    fn from(config: &TraversalConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_combinations: config.max_combinations,
            pace: Duration::from_millis(config.pace_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinationPhase {
    Pending,
    Selecting,
    Reading,
    Retrying,
    Recorded,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TraversalEnd {
    Completed,
    Cancelled,
    Aborted { reason: String },
}

impl TraversalEnd {
    pub fn is_aborted(&self) -> bool {
        matches!(self, TraversalEnd::Aborted { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub visited: usize,
    /// Combinations skipped because a prior run already has them.
    pub resumed: usize,
    pub apply_calls: usize,
    /// Checks that an untouched dimension kept its option.
    pub confirm_calls: usize,
    pub read_calls: usize,
    pub resets: usize,
    pub retries: usize,
}

#[derive(Debug)]
pub struct TraversalOutcome {
    /// Results recorded by this run, in generation order.
    pub results: Vec<CombinationResult>,
    pub images: ImageTable,
    pub end: TraversalEnd,
    pub stats: TraversalStats,
}

/// Process-local state owned by one controller for one run.
struct TraversalState {
    selection: Selection,
    visited: HashSet<Combination>,
    results: HashMap<Combination, CombinationResult>,
    order: Vec<Combination>,
    images: ImageTable,
}

enum Visit {
    Resolved(CombinationResult),
    /// The combination was resolved, then the surface went away while recovering.
    ResolvedThenDetached(CombinationResult, String),
    Detached(String),
}

pub struct TraversalController<'a, O: Oracle + ?Sized> {
    oracle: &'a O,
    model: &'a ProductModel,
    options: TraversalOptions,
    cancel: CancellationToken,
    state: TraversalState,
    stats: TraversalStats,
}

impl<'a, O: Oracle + ?Sized> TraversalController<'a, O> {
    pub fn new(oracle: &'a O, model: &'a ProductModel, options: TraversalOptions) -> Self {
        let options = TraversalOptions {
            max_attempts: options.max_attempts.max(1),
            ..options
        };
        Self {
            oracle,
            model,
            options,
            cancel: CancellationToken::new(),
            state: TraversalState {
                selection: Selection::unknown(model.dimension_count()),
                visited: HashSet::new(),
                results: HashMap::new(),
                order: Vec::new(),
                images: ImageTable::new(),
            },
            stats: TraversalStats::default(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Mark combinations a prior run resolved as visited. Only `Ok` results
    /// count; everything else is tried again.
    pub fn seed_prior<I>(mut self, prior: I) -> Result<Self>
    where
        I: IntoIterator<Item = CombinationResult>,
    {
        for result in prior.into_iter().filter(CombinationResult::is_ok) {
            if !self.model.contains(&result.combination) {
                return Err(AppError::InvalidModel(format!(
                    "prior result {} does not fit the variant model",
                    result.combination
                )));
            }
            self.state.visited.insert(result.combination);
        }
        debug!("Seeded {} prior ok combinations", self.state.visited.len());
        Ok(self)
    }

    pub async fn run(mut self) -> TraversalOutcome {
        let generator = CombinationGenerator::new(self.model).with_cap(self.options.max_combinations);
        let planned = generator.len();
        self.log_model(planned);

        let mut end = TraversalEnd::Completed;
        for (position, combination) in generator.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Traversal cancelled before {}", combination);
                end = TraversalEnd::Cancelled;
                break;
            }
            if self.state.visited.contains(&combination) {
                trace!("{} already resolved, skipping", combination);
                self.stats.resumed += 1;
                continue;
            }

            if position > 0 && !self.pace().await {
                end = TraversalEnd::Cancelled;
                break;
            }

            let started = Instant::now();
            let visit = self.visit(&combination).await;
            metrics::histogram!("sku_combination_duration_seconds")
                .record(started.elapsed().as_secs_f64());

            match visit {
                Visit::Resolved(result) => {
                    self.log_result(position, planned, &result);
                    self.record(result);
                }
                Visit::ResolvedThenDetached(result, reason) => {
                    self.log_result(position, planned, &result);
                    self.record(result);
                    error!("Surface detached during recovery, aborting: {}", reason);
                    end = TraversalEnd::Aborted { reason };
                    break;
                }
                Visit::Detached(reason) => {
                    error!("Surface detached at {}, aborting: {}", combination, reason);
                    end = TraversalEnd::Aborted { reason };
                    break;
                }
            }
        }

        info!(
            "Traversal finished ({:?}): {} recorded, {} resumed, {} apply calls",
            end,
            self.state.order.len(),
            self.stats.resumed,
            self.stats.apply_calls
        );

        let TraversalState {
            mut results,
            order,
            images,
            ..
        } = self.state;
        let results = order
            .into_iter()
            .filter_map(|combination| results.remove(&combination))
            .collect();

        TraversalOutcome {
            results,
            images,
            end,
            stats: self.stats,
        }
    }

    fn log_model(&self, planned: usize) {
        info!(
            "Traversing {} of {} combinations over {} dimensions",
            planned,
            self.model.total_combinations(),
            self.model.dimension_count()
        );
        for dimension in self.model.dimensions() {
            let labels: Vec<&str> = dimension.options.iter().map(|o| o.label.as_str()).collect();
            info!("  {} ({}): {}", dimension.name, labels.len(), labels.join(", "));
        }
    }

    fn log_result(&self, position: usize, planned: usize, result: &CombinationResult) {
        let described = self.model.describe(&result.combination);
        match result.status {
            CombinationStatus::Ok => info!(
                "[{}/{}] {} -> {}",
                position + 1,
                planned,
                described,
                result.raw_price.as_deref().unwrap_or("no price")
            ),
            _ => warn!(
                "[{}/{}] {} -> {} ({})",
                position + 1,
                planned,
                described,
                result.status,
                result.detail.as_deref().unwrap_or("")
            ),
        }
    }

    fn record(&mut self, result: CombinationResult) {
        let phase = if result.is_ok() {
            CombinationPhase::Recorded
        } else {
            CombinationPhase::Skipped
        };
        trace!("{} {:?}", result.combination, phase);
        metrics::counter!("sku_combinations_total", "status" => result.status.to_string())
            .increment(1);

        self.stats.visited += 1;
        self.state.visited.insert(result.combination.clone());
        self.state.order.push(result.combination.clone());
        self.state.results.insert(result.combination.clone(), result);
    }

    /// Sleep between combinations. Returns false if cancelled while waiting.
    async fn pace(&self) -> bool {
        if self.options.pace.is_zero() {
            return true;
        }
        let delay = self.options.pace / 2 + jitter(self.options.pace);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    async fn visit(&mut self, combination: &Combination) -> Visit {
        trace!("{} {:?}", combination, CombinationPhase::Pending);
        let mut backoff = FixedInterval::new(self.options.retry_backoff);
        let mut attempts = 0;
        let mut last_error = String::new();

        while attempts < self.options.max_attempts {
            attempts += 1;
            if attempts > 1 {
                trace!("{} {:?}", combination, CombinationPhase::Retrying);
                self.stats.retries += 1;
                if let Some(delay) = backoff.next() {
                    sleep(delay).await;
                }
            }

            match self.select(combination).await {
                Ok(()) => {}
                Err(OracleError::Rejected(reason)) => {
                    return Visit::Resolved(CombinationResult::unavailable(
                        combination.clone(),
                        attempts,
                        reason,
                    ));
                }
                Err(OracleError::Detached(reason)) => return Visit::Detached(reason),
                Err(OracleError::Transient(reason)) => {
                    warn!(
                        "Selecting {} failed (attempt {}/{}): {}",
                        combination, attempts, self.options.max_attempts, reason
                    );
                    last_error = reason;
                    continue;
                }
            }

            trace!("{} {:?}", combination, CombinationPhase::Reading);
            self.stats.read_calls += 1;
            metrics::counter!("sku_oracle_calls_total", "op" => "read").increment(1);
            match self.oracle.read_state().await {
                Ok(state) => match state.availability {
                    Availability::Available => {
                        let price = state
                            .price
                            .as_deref()
                            .and_then(normalize_price);
                        if price.is_none() {
                            debug!("Price text {:?} for {} is not numeric", state.price, combination);
                        }
                        let image = state
                            .image_url
                            .as_deref()
                            .and_then(|url| self.state.images.intern(url));
                        return Visit::Resolved(CombinationResult::ok(
                            combination.clone(),
                            price,
                            state.price,
                            image,
                            attempts,
                        ));
                    }
                    Availability::Unavailable => {
                        return Visit::Resolved(CombinationResult::unavailable(
                            combination.clone(),
                            attempts,
                            "combination is not available",
                        ));
                    }
                    Availability::Unknown => {
                        warn!(
                            "{} did not settle (attempt {}/{})",
                            combination, attempts, self.options.max_attempts
                        );
                        last_error = "surface did not settle".to_string();
                    }
                },
                Err(OracleError::Detached(reason)) => return Visit::Detached(reason),
                Err(OracleError::Rejected(reason)) => {
                    return Visit::Resolved(CombinationResult::unavailable(
                        combination.clone(),
                        attempts,
                        reason,
                    ));
                }
                Err(OracleError::Transient(reason)) => {
                    warn!(
                        "Reading {} failed (attempt {}/{}): {}",
                        combination, attempts, self.options.max_attempts, reason
                    );
                    last_error = reason;
                }
            }
        }

        let failed = CombinationResult::failed(combination.clone(), attempts, last_error);
        match self.recover().await {
            Ok(()) => Visit::Resolved(failed),
            Err(reason) => Visit::ResolvedThenDetached(failed, reason),
        }
    }

    /// Apply only the dimensions that differ from the believed selection, in
    /// dimension order. Untouched dimensions after the first changed one are
    /// checked and re-applied if the change cleared them. A failed dimension
    /// becomes unknown.
    async fn select(&mut self, combination: &Combination) -> std::result::Result<(), OracleError> {
        trace!("{} {:?}", combination, CombinationPhase::Selecting);
        let changed = self.state.selection.diff(combination);
        debug!("{}: applying dimensions {:?}", combination, changed);
        let Some(&first) = changed.first() else {
            return Ok(());
        };

        for dimension in first..combination.len() {
            let index = combination.get(dimension).unwrap_or_default();
            let option = self
                .model
                .dimension(dimension)
                .and_then(|d| d.option(index))
                .ok_or_else(|| {
                    OracleError::Rejected(format!("no option {} in dimension {}", index, dimension))
                })?;

            if !changed.contains(&dimension) {
                self.stats.confirm_calls += 1;
                metrics::counter!("sku_oracle_calls_total", "op" => "confirm").increment(1);
                match self.oracle.is_selected(dimension, option).await {
                    Ok(true) => continue,
                    Ok(false) => debug!(
                        "{}: dimension {} lost '{}', re-applying",
                        combination, dimension, option.label
                    ),
                    Err(e) => {
                        self.state.selection.forget(dimension);
                        return Err(e);
                    }
                }
            }

            self.stats.apply_calls += 1;
            metrics::counter!("sku_oracle_calls_total", "op" => "apply").increment(1);
            if let Err(e) = self.oracle.apply_selection(dimension, option).await {
                self.state.selection.forget(dimension);
                return Err(e);
            }
            self.state.selection.set(dimension, index);
        }
        Ok(())
    }

    /// Best-effort reset after retries ran out. Only a detached surface is an error.
    async fn recover(&mut self) -> std::result::Result<(), String> {
        self.stats.resets += 1;
        metrics::counter!("sku_oracle_calls_total", "op" => "reset").increment(1);
        match self.oracle.reset().await {
            Ok(()) => {
                self.state.selection = Selection::baseline(self.model.dimension_count());
                Ok(())
            }
            Err(OracleError::Detached(reason)) => Err(reason),
            Err(e) => {
                warn!("Reset failed, selection is now unknown: {}", e);
                self.state.selection.forget_all();
                Ok(())
            }
        }
    }
}
