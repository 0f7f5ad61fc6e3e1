use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::aggregator::{ImageEntry, RunSummary};
use crate::models::{CombinationResult, CombinationStatus, ImageRef, ProductModel};
use crate::utils::{AppError, Result};

/// Everything a run produced, as written to disk and read back for `resume_from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub model: ProductModel,
    /// Generation order.
    pub results: Vec<CombinationResult>,
    pub images: Vec<ImageEntry>,
    pub summary: RunSummary,
    #[serde(default)]
    pub price_tiers: Vec<Decimal>,
}

/// One spreadsheet row: option labels, then image, then price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub labels: Vec<String>,
    pub image_url: Option<String>,
    pub price: Option<Decimal>,
    pub status: CombinationStatus,
}

impl ExportBundle {
    pub fn image_url(&self, key: &ImageRef) -> Option<&str> {
        self.images
            .iter()
            .find(|e| &e.key == key)
            .map(|e| e.url.as_str())
    }

    /// Header row: dimension names, then image and price columns.
    pub fn header(&self) -> Vec<String> {
        self.model
            .dimensions()
            .iter()
            .map(|d| d.name.clone())
            .chain(["image".to_string(), "price".to_string()])
            .collect()
    }

    pub fn rows(&self) -> Vec<ExportRow> {
        self.results
            .iter()
            .filter_map(|result| {
                let labels = self.model.labels_for(&result.combination)?;
                Some(ExportRow {
                    labels,
                    image_url: result
                        .image
                        .as_ref()
                        .and_then(|key| self.image_url(key))
                        .map(str::to_string),
                    price: result.price,
                    status: result.status,
                })
            })
            .collect()
    }
}

pub fn write_bundle(bundle: &ExportBundle, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(bundle)?;
    fs::write(path, json)?;
    info!(
        "Wrote {} results and {} images to {}",
        bundle.results.len(),
        bundle.images.len(),
        path.display()
    );
    Ok(())
}

pub fn read_bundle(path: &Path) -> Result<ExportBundle> {
    if !path.exists() {
        return Err(AppError::NotFound {
            resource: path.display().to_string(),
        });
    }
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
