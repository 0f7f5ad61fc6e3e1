//! Writes a harvested variant structure into another storefront's listing editor.
//!
//! Prices are written positionally: row `k` of the editor's price table is the
//! `k`-th combination in generation order.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ReplayConfig;
use crate::export::ExportBundle;
use crate::generator::generate;
use crate::models::CombinationStatus;
use crate::utils::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDimension {
    pub name: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedCombination {
    pub position: usize,
    pub indices: Vec<usize>,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayPlan {
    pub dimensions: Vec<ReplayDimension>,
    /// One entry per combination, generation order.
    pub prices: Vec<PricedCombination>,
}

impl ReplayPlan {
    pub fn from_bundle(bundle: &ExportBundle) -> Self {
        let dimensions = bundle
            .model
            .dimensions()
            .iter()
            .map(|d| ReplayDimension {
                name: d.name.clone(),
                options: d.options.iter().map(|o| o.label.clone()).collect(),
            })
            .collect();

        let mut results = bundle.results.iter().peekable();
        let prices = generate(&bundle.model, None)
            .enumerate()
            .map(|(position, combination)| {
                // Results are in generation order, so a single forward scan pairs them up
                while results.peek().is_some_and(|r| r.combination < combination) {
                    results.next();
                }
                let price = results
                    .peek()
                    .filter(|r| r.combination == combination && r.status == CombinationStatus::Ok)
                    .and_then(|r| r.price);
                PricedCombination {
                    position,
                    indices: combination.indices().to_vec(),
                    price,
                }
            })
            .collect();

        Self { dimensions, prices }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    pub min_price: Decimal,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            min_price: Decimal::new(1, 2),
        }
    }
}

impl From<&ReplayConfig> for ReplayOptions {
    fn from(config: &ReplayConfig) -> Self {
        Self {
            min_price: Decimal::try_from(config.min_price)
                .map(|p| p.round_dp(2))
                .unwrap_or_else(|_| ReplayOptions::default().min_price),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub dimensions_created: usize,
    pub dimensions_existing: usize,
    pub options_added: usize,
    pub options_existing: usize,
    pub prices_written: usize,
    pub prices_already_set: usize,
    pub prices_skipped: usize,
}

/// The second storefront's listing editor, as far as replay needs it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingEditor: Send + Sync {
    async fn existing_dimensions(&self) -> Result<Vec<String>>;

    async fn create_dimension(&self, name: &str) -> Result<()>;

    async fn existing_options(&self, dimension: &str) -> Result<Vec<String>>;

    async fn add_option(&self, dimension: &str, label: &str) -> Result<()>;

    /// Current value of the price field in row `position`, if it holds a number.
    async fn price_field(&self, position: usize) -> Result<Option<Decimal>>;

    async fn set_price(&self, position: usize, price: Decimal) -> Result<()>;

    async fn save_draft(&self) -> Result<()>;
}

/// Create missing dimensions and options, then fill empty price fields.
/// Safe to run again: existing entries and non-zero prices are left alone.
pub async fn replay<E: ListingEditor + ?Sized>(
    editor: &E,
    plan: &ReplayPlan,
    options: ReplayOptions,
) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();

    let existing = editor.existing_dimensions().await?;
    for dimension in &plan.dimensions {
        if existing.iter().any(|name| name == &dimension.name) {
            debug!("Dimension '{}' already present", dimension.name);
            report.dimensions_existing += 1;
        } else {
            editor.create_dimension(&dimension.name).await?;
            info!("Created dimension '{}'", dimension.name);
            report.dimensions_created += 1;
        }

        let present = editor.existing_options(&dimension.name).await?;
        for label in &dimension.options {
            if present.iter().any(|p| p == label) {
                report.options_existing += 1;
                continue;
            }
            editor.add_option(&dimension.name, label).await?;
            report.options_added += 1;
        }
    }

    for entry in &plan.prices {
        let price = match entry.price {
            Some(price) if price >= options.min_price => price,
            _ => {
                report.prices_skipped += 1;
                continue;
            }
        };
        if editor
            .price_field(entry.position)
            .await?
            .is_some_and(|current| !current.is_zero())
        {
            report.prices_already_set += 1;
            continue;
        }
        editor.set_price(entry.position, price).await?;
        report.prices_written += 1;
    }

    editor.save_draft().await?;
    info!(
        "Replay done: {} dimensions created, {} options added, {} prices written",
        report.dimensions_created, report.options_added, report.prices_written
    );
    Ok(report)
}
