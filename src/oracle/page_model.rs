use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::SelectorConfig;
use crate::models::{Dimension, ProductModel, SkuOption};
use crate::utils::{AppError, Result};

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AppError::Parse {
        message: format!("Invalid CSS selector '{}': {:?}", selector, e),
    })
}

fn optional_selector(selector: &str) -> Result<Option<Selector>> {
    if selector.trim().is_empty() {
        Ok(None)
    } else {
        parse_selector(selector).map(Some)
    }
}

fn collapse_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Title attribute first, then visible text.
fn labelled_text(element: ElementRef<'_>) -> String {
    element
        .value()
        .attr("title")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| collapse_text(element))
}

fn is_disabled(element: ElementRef<'_>) -> bool {
    let value = element.value();
    value
        .attr("data-disabled")
        .is_some_and(|d| d.eq_ignore_ascii_case("true"))
        || value.attr("aria-disabled").is_some_and(|d| d.eq_ignore_ascii_case("true"))
}

fn image_source(element: ElementRef<'_>) -> Option<String> {
    let value = element.value();
    ["src", "data-src", "data-ks-lazyload", "data-lazy-src"]
        .iter()
        .filter_map(|attr| value.attr(attr))
        .map(str::trim)
        .find(|src| !src.is_empty() && !src.starts_with("data:"))
        .map(|src| {
            if src.starts_with("//") {
                format!("https:{}", src)
            } else {
                src.to_string()
            }
        })
}

/// Build the variant model from a product page's HTML.
///
/// Disabled options are left out, as are dimensions with nothing selectable.
/// A dimension without a readable label is named `Dimension N` (1-based).
pub fn parse_product_model(html: &str, selectors: &SelectorConfig) -> Result<ProductModel> {
    let document = Html::parse_document(html);
    let item_selector = parse_selector(&selectors.sku_item)?;
    let option_selector = parse_selector(&selectors.option)?;
    let text_selector = parse_selector(&selectors.option_text)?;
    let label_selector = optional_selector(&selectors.dimension_label)?;
    let image_selector = optional_selector(&selectors.option_image)?;

    let mut dimensions = Vec::new();
    let mut names = HashSet::new();

    for (position, item) in document.select(&item_selector).enumerate() {
        let mut name = label_selector
            .as_ref()
            .and_then(|s| item.select(s).next())
            .map(labelled_text)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Dimension {}", position + 1));
        if !names.insert(name.clone()) {
            name = format!("{} ({})", name, position + 1);
            names.insert(name.clone());
        }

        let mut options: Vec<SkuOption> = Vec::new();
        for element in item.select(&option_selector) {
            if is_disabled(element) {
                debug!("Skipping disabled option in '{}'", name);
                continue;
            }

            let label = element
                .select(&text_selector)
                .next()
                .map(labelled_text)
                .unwrap_or_default();
            if label.is_empty() {
                continue;
            }
            if options.iter().any(|o| o.label == label) {
                warn!("Duplicate option '{}' in dimension '{}', keeping the first", label, name);
                continue;
            }

            let mut option = SkuOption::new(label);
            if let Some(vid) = element.value().attr("data-vid").filter(|v| !v.is_empty()) {
                option = option.with_value_id(vid);
            }
            if let Some(src) = image_selector
                .as_ref()
                .and_then(|s| element.select(s).next())
                .and_then(image_source)
            {
                option = option.with_image_url(src);
            }
            options.push(option);
        }

        if options.is_empty() {
            debug!("Dimension '{}' has no selectable options, skipping", name);
            continue;
        }
        dimensions.push(Dimension::new(name, options)?);
    }

    if dimensions.is_empty() {
        return Err(AppError::InvalidModel(
            "no SKU dimensions found on the page".to_string(),
        ));
    }

    ProductModel::new(dimensions)
}
