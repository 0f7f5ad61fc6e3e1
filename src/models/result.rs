use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Combination;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CombinationStatus {
    Ok,
    Unavailable,
    Failed,
}

impl fmt::Display for CombinationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CombinationStatus::Ok => "ok",
            CombinationStatus::Unavailable => "unavailable",
            CombinationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Content-derived key into the deduplicated image table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationResult {
    pub combination: Combination,
    pub price: Option<Decimal>,
    /// Price text as displayed, kept when it could not be normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    pub status: CombinationStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CombinationResult {
    pub fn ok(
        combination: Combination,
        price: Option<Decimal>,
        raw_price: Option<String>,
        image: Option<ImageRef>,
        attempts: u32,
    ) -> Self {
        Self {
            combination,
            price,
            raw_price,
            image,
            status: CombinationStatus::Ok,
            attempts,
            detail: None,
        }
    }

    pub fn unavailable(combination: Combination, attempts: u32, detail: impl Into<String>) -> Self {
        Self::skipped(combination, CombinationStatus::Unavailable, attempts, detail)
    }

    pub fn failed(combination: Combination, attempts: u32, detail: impl Into<String>) -> Self {
        Self::skipped(combination, CombinationStatus::Failed, attempts, detail)
    }

    fn skipped(
        combination: Combination,
        status: CombinationStatus,
        attempts: u32,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            combination,
            price: None,
            raw_price: None,
            image: None,
            status,
            attempts,
            detail: Some(detail.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == CombinationStatus::Ok
    }
}
