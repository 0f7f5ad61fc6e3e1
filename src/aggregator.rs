//! Collects per-combination results into the final, ordered bundle.
//!
//! Images are deduplicated by a SHA-256 key of their normalized URL. Indices
//! are handed out by first reference in generation order, so two runs over the
//! same page produce the same image numbering.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};
use url::Url;

use crate::export::ExportBundle;
use crate::models::{Combination, CombinationResult, CombinationStatus, ImageRef, ProductModel};
use crate::traversal::{TraversalEnd, TraversalOutcome};
use crate::utils::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub index: usize,
    pub key: ImageRef,
    pub url: String,
}

/// Trim, upgrade protocol-relative URLs and canonicalize through `url`.
/// Inline `data:` images and blanks are not kept.
pub fn normalize_image_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with("data:") {
        return None;
    }
    let absolute = if trimmed.starts_with("//") {
        format!("https:{}", trimmed)
    } else {
        trimmed.to_string()
    };
    Some(
        Url::parse(&absolute)
            .map(|u| u.to_string())
            .unwrap_or(absolute),
    )
}

pub fn image_key(normalized_url: &str) -> ImageRef {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    ImageRef(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, Default)]
pub struct ImageTable {
    entries: Vec<ImageEntry>,
    by_key: HashMap<ImageRef, usize>,
}

impl ImageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ImageEntry>) -> Self {
        let mut table = Self::new();
        for entry in entries {
            table.insert(entry.key, entry.url);
        }
        table
    }

    /// Key for `raw`, adding it on first sight.
    pub fn intern(&mut self, raw: &str) -> Option<ImageRef> {
        let url = normalize_image_url(raw)?;
        let key = image_key(&url);
        self.insert(key.clone(), url);
        Some(key)
    }

    fn insert(&mut self, key: ImageRef, url: String) {
        if self.by_key.contains_key(&key) {
            return;
        }
        let index = self.entries.len();
        self.by_key.insert(key.clone(), index);
        self.entries.push(ImageEntry { index, key, url });
    }

    pub fn get(&self, key: &ImageRef) -> Option<&ImageEntry> {
        self.by_key.get(key).map(|&i| &self.entries[i])
    }

    pub fn url(&self, key: &ImageRef) -> Option<&str> {
        self.get(key).map(|e| e.url.as_str())
    }

    pub fn entries(&self) -> &[ImageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_combinations: usize,
    pub recorded: usize,
    pub ok: usize,
    pub unavailable: usize,
    pub failed: usize,
    /// Combinations with no result at all.
    pub missing: usize,
    pub images: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<TraversalEnd>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.missing == 0 && self.failed == 0
    }
}

#[derive(Debug)]
pub struct ResultAggregator {
    model: ProductModel,
    source_url: Option<String>,
    results: BTreeMap<Combination, CombinationResult>,
    images: ImageTable,
    end: Option<TraversalEnd>,
}

impl ResultAggregator {
    pub fn new(model: ProductModel) -> Self {
        Self {
            model,
            source_url: None,
            results: BTreeMap::new(),
            images: ImageTable::new(),
            end: None,
        }
    }

    pub fn with_source_url(mut self, source_url: Option<String>) -> Self {
        self.source_url = source_url;
        self
    }

    /// Start from a prior export of the same product.
    pub fn from_export(bundle: &ExportBundle, model: &ProductModel) -> Result<Self> {
        if !bundle.model.same_labels(model) {
            return Err(AppError::InvalidModel(
                "prior export was taken from a different variant model".to_string(),
            ));
        }

        let images = ImageTable::from_entries(bundle.images.iter().cloned());
        let mut aggregator = Self::new(model.clone()).with_source_url(bundle.source_url.clone());
        for result in &bundle.results {
            aggregator.merge(result.clone(), &images)?;
        }
        info!(
            "Loaded {} prior results ({} ok)",
            aggregator.results.len(),
            aggregator.prior_ok().len()
        );
        Ok(aggregator)
    }

    pub fn model(&self) -> &ProductModel {
        &self.model
    }

    /// Ok results recorded so far, in generation order.
    pub fn prior_ok(&self) -> Vec<CombinationResult> {
        self.results.values().filter(|r| r.is_ok()).cloned().collect()
    }

    pub fn get(&self, combination: &Combination) -> Option<&CombinationResult> {
        self.results.get(combination)
    }

    /// Fold one result in. An existing `Ok` entry is never replaced; anything
    /// else is overwritten by the newer result. Returns whether the table changed.
    pub fn merge(&mut self, result: CombinationResult, images: &ImageTable) -> Result<bool> {
        if !self.model.contains(&result.combination) {
            return Err(AppError::InvalidModel(format!(
                "result {} does not fit the variant model",
                result.combination
            )));
        }
        if self.results.get(&result.combination).is_some_and(|r| r.is_ok()) {
            debug!("Keeping prior ok result for {}", result.combination);
            return Ok(false);
        }

        let mut result = result;
        if let Some(key) = result.image.take() {
            let url = images
                .url(&key)
                .or_else(|| self.images.url(&key))
                .map(str::to_string);
            result.image = url.and_then(|url| self.images.intern(&url));
        }

        let changed = self.results.get(&result.combination) != Some(&result);
        self.results.insert(result.combination.clone(), result);
        Ok(changed)
    }

    pub fn absorb(&mut self, outcome: TraversalOutcome) -> Result<usize> {
        let mut changed = 0;
        for result in outcome.results {
            if self.merge(result, &outcome.images)? {
                changed += 1;
            }
        }
        self.end = Some(outcome.end);
        Ok(changed)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total_combinations: self.model.total_combinations(),
            recorded: self.results.len(),
            end: self.end.clone(),
            ..RunSummary::default()
        };
        for result in self.results.values() {
            match result.status {
                CombinationStatus::Ok => summary.ok += 1,
                CombinationStatus::Unavailable => summary.unavailable += 1,
                CombinationStatus::Failed => summary.failed += 1,
            }
        }
        summary.missing = summary.total_combinations.saturating_sub(summary.recorded);
        summary.images = self.referenced_images().len();
        summary
    }

    /// Distinct prices across ok results, ascending.
    pub fn price_tiers(&self) -> Vec<Decimal> {
        self.results
            .values()
            .filter(|r| r.is_ok())
            .filter_map(|r| r.price.map(|p| p.normalize()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn referenced_images(&self) -> Vec<ImageEntry> {
        let mut seen = HashMap::new();
        let mut entries = Vec::new();
        for key in self.results.values().filter_map(|r| r.image.as_ref()) {
            if seen.contains_key(key) {
                continue;
            }
            if let Some(url) = self.images.url(key) {
                seen.insert(key.clone(), entries.len());
                entries.push(ImageEntry {
                    index: entries.len(),
                    key: key.clone(),
                    url: url.to_string(),
                });
            }
        }
        entries
    }

    /// Ordered results plus the image table, renumbered and without unused images.
    pub fn finish(self) -> ExportBundle {
        let summary = self.summary();
        let price_tiers = self.price_tiers();
        let images = self.referenced_images();
        ExportBundle {
            generated_at: Utc::now(),
            source_url: self.source_url,
            model: self.model,
            results: self.results.into_values().collect(),
            images,
            summary,
            price_tiers,
        }
    }
}
