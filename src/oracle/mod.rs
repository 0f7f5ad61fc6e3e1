//! The live, stateful surface a traversal drives.
//!
//! An [`Oracle`] applies one option at a time and reports what the surface
//! currently displays. Implementations hold no traversal state of their own;
//! every call is answered from the surface itself.

pub mod chrome;
pub mod page_model;
pub mod scripted;
pub mod settle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SkuOption;

pub use chrome::ChromeOracle;
pub use scripted::{ScriptedOracle, SelectionCall};
pub use settle::{Probe, SettleOutcome, SettleWait};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    /// The session or page is gone. Fatal for the whole traversal.
    #[error("surface detached: {0}")]
    Detached(String),

    /// Timeouts, stale elements and similar. Retryable.
    #[error("transient surface error: {0}")]
    Transient(String),

    /// The surface refused the selection, e.g. a disabled option.
    #[error("selection rejected: {0}")]
    Rejected(String),
}

impl OracleError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OracleError::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, OracleError::Detached(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable,
    /// The surface did not settle within the bound.
    Unknown,
}

/// What the surface displays for the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleState {
    /// Raw price text, not yet normalized.
    pub price: Option<String>,
    pub image_url: Option<String>,
    pub availability: Availability,
}

impl OracleState {
    pub fn available(price: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            price: Some(price.into()),
            image_url,
            availability: Availability::Available,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            price: None,
            image_url: None,
            availability: Availability::Unavailable,
        }
    }

    pub fn unknown() -> Self {
        Self {
            price: None,
            image_url: None,
            availability: Availability::Unknown,
        }
    }
}

/// Capability set the traversal controller needs from the surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Make `option` the active choice for the dimension at `dimension`.
    /// Applying an option that is already active is a no-op.
    async fn apply_selection(&self, dimension: usize, option: &SkuOption) -> Result<(), OracleError>;

    /// Whether `option` is still the active choice for `dimension`. Selecting in
    /// an upper dimension can clear a lower one on some pages.
    async fn is_selected(&self, dimension: usize, option: &SkuOption) -> Result<bool, OracleError>;

    /// Read the displayed state after the most recent selection, settling first.
    async fn read_state(&self) -> Result<OracleState, OracleError>;

    /// Return the surface to its baseline selection (first option everywhere).
    async fn reset(&self) -> Result<(), OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(OracleError::Transient("stale element".into()).is_retryable());
        assert!(!OracleError::Rejected("disabled".into()).is_retryable());
        assert!(OracleError::Detached("gone".into()).is_fatal());
        assert!(!OracleError::Transient("timeout".into()).is_fatal());
    }

    #[test]
    fn test_state_constructors() {
        let state = OracleState::available("¥10", None);
        assert_eq!(state.availability, Availability::Available);
        assert_eq!(OracleState::unknown().price, None);
        assert_eq!(
            serde_json::to_string(&Availability::Unavailable).unwrap(),
            "\"unavailable\""
        );
    }
}
