use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::Combination;
use crate::utils::error::{AppError, Result};

/// One concrete value within a dimension, e.g. "red" or "XL".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuOption {
    pub label: String,
    /// Variant image shown while this option is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Storefront identifier for the option (e.g. `data-vid`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<String>,
}

impl SkuOption {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            image_url: None,
            value_id: None,
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_value_id(mut self, value_id: impl Into<String>) -> Self {
        self.value_id = Some(value_id.into());
        self
    }
}

/// An independent variant axis. Option order mirrors the on-page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub options: Vec<SkuOption>,
}

impl Dimension {
    pub fn new(name: impl Into<String>, options: Vec<SkuOption>) -> Result<Self> {
        let dimension = Self {
            name: name.into(),
            options,
        };
        dimension.validate()?;
        Ok(dimension)
    }

    /// Convenience constructor for label-only options.
    pub fn from_labels<I, S>(name: impl Into<String>, labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, labels.into_iter().map(SkuOption::new).collect())
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn option(&self, index: usize) -> Option<&SkuOption> {
        self.options.get(index)
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.options.iter().position(|o| o.label == label)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidModel("dimension name must not be empty".into()));
        }
        if self.options.is_empty() {
            return Err(AppError::InvalidModel(format!(
                "dimension '{}' has no options",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for option in &self.options {
            if option.label.trim().is_empty() {
                return Err(AppError::InvalidModel(format!(
                    "dimension '{}' contains an option with an empty label",
                    self.name
                )));
            }
            if !seen.insert(option.label.as_str()) {
                return Err(AppError::InvalidModel(format!(
                    "dimension '{}' has duplicate option '{}'",
                    self.name, option.label
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ProductModelDef {
    dimensions: Vec<Dimension>,
}

/// A product's full variant space. Always valid once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProductModelDef")]
pub struct ProductModel {
    dimensions: Vec<Dimension>,
}

impl TryFrom<ProductModelDef> for ProductModel {
    type Error = AppError;

    fn try_from(def: ProductModelDef) -> Result<Self> {
        ProductModel::new(def.dimensions)
    }
}

impl ProductModel {
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(AppError::InvalidModel("product has no dimensions".into()));
        }

        let mut names = HashSet::new();
        for dimension in &dimensions {
            dimension.validate()?;
            if !names.insert(dimension.name.as_str()) {
                return Err(AppError::InvalidModel(format!(
                    "duplicate dimension '{}'",
                    dimension.name
                )));
            }
        }

        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, index: usize) -> Option<&Dimension> {
        self.dimensions.get(index)
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Option count per dimension, in declaration order.
    pub fn radices(&self) -> Vec<usize> {
        self.dimensions.iter().map(Dimension::len).collect()
    }

    /// Size of the full combination space. Saturates instead of overflowing.
    pub fn total_combinations(&self) -> usize {
        self.dimensions
            .iter()
            .fold(1usize, |acc, d| acc.saturating_mul(d.len()))
    }

    /// True when `combination` has one in-range index per dimension.
    pub fn contains(&self, combination: &Combination) -> bool {
        combination.len() == self.dimensions.len()
            && combination
                .indices()
                .iter()
                .zip(&self.dimensions)
                .all(|(&index, dimension)| index < dimension.len())
    }

    /// Options selected by `combination`, or `None` if it does not fit this model.
    pub fn options_for(&self, combination: &Combination) -> Option<Vec<&SkuOption>> {
        if !self.contains(combination) {
            return None;
        }
        Some(
            combination
                .indices()
                .iter()
                .zip(&self.dimensions)
                .map(|(&index, dimension)| &dimension.options[index])
                .collect(),
        )
    }

    pub fn labels_for(&self, combination: &Combination) -> Option<Vec<String>> {
        self.options_for(combination)
            .map(|options| options.into_iter().map(|o| o.label.clone()).collect())
    }

    /// Same dimension names and option labels, in the same order. Option
    /// images and value ids may differ between page loads.
    pub fn same_labels(&self, other: &ProductModel) -> bool {
        self.dimensions.len() == other.dimensions.len()
            && self.dimensions.iter().zip(&other.dimensions).all(|(a, b)| {
                a.name == b.name
                    && a.options.len() == b.options.len()
                    && a.options.iter().zip(&b.options).all(|(x, y)| x.label == y.label)
            })
    }

    /// Human readable form, e.g. `Color: Red | Size: M`.
    pub fn describe(&self, combination: &Combination) -> String {
        match self.options_for(combination) {
            Some(options) => self
                .dimensions
                .iter()
                .zip(options)
                .map(|(d, o)| format!("{}: {}", d.name, o.label))
                .collect::<Vec<_>>()
                .join(" | "),
            None => combination.to_string(),
        }
    }
}
