// Integration tests for SKU Harvester
// These tests drive the traversal engine end to end against the scripted surface

pub mod replay_tests;
pub mod resume_tests;
pub mod traversal_tests;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

use sku_harvester::models::{Dimension, ProductModel, SkuOption};
use sku_harvester::replay::ListingEditor;
use sku_harvester::utils::{AppError, Result};
use sku_harvester::TraversalOptions;

/// Color (Red, Blue) x Size (S, M, L), the shape most storefront listings have.
pub fn sample_model() -> ProductModel {
    ProductModel::new(vec![
        Dimension::new(
            "Color",
            vec![
                SkuOption::new("Red").with_value_id("101"),
                SkuOption::new("Blue").with_value_id("102"),
            ],
        )
        .expect("valid dimension"),
        Dimension::from_labels("Size", ["S", "M", "L"]).expect("valid dimension"),
    ])
    .expect("valid model")
}

pub fn test_options() -> TraversalOptions {
    TraversalOptions {
        max_attempts: 3,
        retry_backoff: Duration::from_millis(1),
        max_combinations: None,
        pace: Duration::ZERO,
    }
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal")
}

#[derive(Debug, Clone, Default)]
pub struct EditorState {
    pub dimensions: Vec<(String, Vec<String>)>,
    pub prices: BTreeMap<usize, Decimal>,
    pub saves: usize,
}

/// Listing editor kept in memory, rows addressed by generation position.
#[derive(Default)]
pub struct InMemoryEditor {
    state: Mutex<EditorState>,
}

impl InMemoryEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(mut self, name: &str, options: &[&str]) -> Self {
        self.state.get_mut().dimensions.push((
            name.to_string(),
            options.iter().map(|o| o.to_string()).collect(),
        ));
        self
    }

    pub fn with_price(mut self, position: usize, price: Decimal) -> Self {
        self.state.get_mut().prices.insert(position, price);
        self
    }

    pub async fn snapshot(&self) -> EditorState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl ListingEditor for InMemoryEditor {
    async fn existing_dimensions(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.dimensions.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn create_dimension(&self, name: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .dimensions
            .push((name.to_string(), Vec::new()));
        Ok(())
    }

    async fn existing_options(&self, dimension: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        state
            .dimensions
            .iter()
            .find(|(name, _)| name == dimension)
            .map(|(_, options)| options.clone())
            .ok_or_else(|| AppError::Replay(format!("unknown dimension '{}'", dimension)))
    }

    async fn add_option(&self, dimension: &str, label: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let (_, options) = state
            .dimensions
            .iter_mut()
            .find(|(name, _)| name == dimension)
            .ok_or_else(|| AppError::Replay(format!("unknown dimension '{}'", dimension)))?;
        options.push(label.to_string());
        Ok(())
    }

    async fn price_field(&self, position: usize) -> Result<Option<Decimal>> {
        Ok(self.state.lock().await.prices.get(&position).copied())
    }

    async fn set_price(&self, position: usize, price: Decimal) -> Result<()> {
        self.state.lock().await.prices.insert(position, price);
        Ok(())
    }

    async fn save_draft(&self) -> Result<()> {
        self.state.lock().await.saves += 1;
        Ok(())
    }
}
