use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

use crate::utils::{AppError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub browser: BrowserConfig,
    #[validate(nested)]
    pub traversal: TraversalConfig,
    #[validate(nested)]
    pub output: OutputConfig,
    #[validate(nested)]
    pub replay: ReplayConfig,
    #[validate(nested)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrowserConfig {
    pub chrome_path: Option<String>,
    pub headless: bool,
    /// Profile directory, reused so a logged-in session survives between runs.
    pub user_data_dir: Option<String>,
    pub user_agent: Option<String>,
    #[validate(range(min = 1))]
    pub page_load_timeout: u64,
    #[validate(nested)]
    pub selectors: SelectorConfig,
}

/// CSS selectors for the product page. Defaults match class-name fragments,
/// which survive the hashed suffixes storefronts append to class names.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SelectorConfig {
    #[validate(length(min = 1))]
    pub sku_item: String,
    #[validate(length(min = 1))]
    pub option: String,
    pub dimension_label: String,
    #[validate(length(min = 1))]
    pub option_text: String,
    pub option_image: String,
    #[validate(length(min = 1))]
    pub price_main: String,
    pub price_symbol: String,
    pub price_fallbacks: Vec<String>,
    pub main_image: String,
    pub sold_out: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_settle_bounds"))]
pub struct TraversalConfig {
    #[validate(range(min = 1))]
    pub max_combinations: Option<usize>,
    pub resume_from: Option<PathBuf>,
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    #[validate(range(min = 1))]
    pub settle_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub settle_poll_ms: u64,
    pub pace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OutputConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReplayConfig {
    #[validate(range(min = 0.0))]
    pub min_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    #[validate(length(min = 1))]
    pub file_name: String,
}

fn validate_settle_bounds(traversal: &TraversalConfig) -> std::result::Result<(), ValidationError> {
    if traversal.settle_poll_ms > traversal.settle_timeout_ms {
        let mut error = ValidationError::new("settle_bounds");
        error.message = Some("settle_poll_ms cannot exceed settle_timeout_ms".into());
        return Err(error);
    }
    Ok(())
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            user_data_dir: None,
            user_agent: None,
            page_load_timeout: 30,
            selectors: SelectorConfig::default(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            sku_item: "[class*='skuItem']".to_string(),
            option: "[class*='valueItem']:not([class*='ImgWrap'])".to_string(),
            dimension_label: "[class*='ItemLabel'] span.f-els-2".to_string(),
            option_text: "span.f-els-1".to_string(),
            option_image: "img".to_string(),
            price_main: "[class*='highlightPrice'] [class*='text']".to_string(),
            price_symbol: "[class*='highlightPrice'] [class*='symbol']".to_string(),
            price_fallbacks: vec![
                "[class*='beltPrice'] [class*='text']".to_string(),
                "[class*='priceWrap'] [class*='text']".to_string(),
                "[class*='price'] [class*='number']".to_string(),
                ".tm-price-current".to_string(),
            ],
            main_image: "img[class*='mainPic']".to_string(),
            sold_out: "[class*='soldOut']".to_string(),
        }
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_combinations: None,
            resume_from: None,
            max_attempts: 3,
            retry_backoff_ms: 250,
            settle_timeout_ms: 800,
            settle_poll_ms: 60,
            pace_ms: 40,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("output/sku_export.json"),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { min_price: 0.01 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_name: "sku-harvester.log".to_string(),
        }
    }
}

impl AppConfig {
    /// Layered load: built-in defaults, then `path` (or `config/default`),
    /// then `config/local`, then `SKU_HARVESTER__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let primary = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("config/default").required(false),
        };

        let s = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(primary)
            // Local overrides (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("SKU_HARVESTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.browser.chrome_path.is_none() {
            config.browser.chrome_path = env::var("CHROME_PATH").ok();
        }
        if let Ok(raw) = env::var("MAX_COMBOS") {
            config.traversal.max_combinations = parse_max_combos(&raw)?;
        }

        config.validate_settings()?;
        Ok(config)
    }

    pub fn validate_settings(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }
}

/// `MAX_COMBOS` accepts a positive count; empty or `0` means unlimited.
fn parse_max_combos(raw: &str) -> Result<Option<usize>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value: usize = raw
        .parse()
        .map_err(|_| {
            AppError::Config(config::ConfigError::Message(format!(
                "MAX_COMBOS must be a number, got '{}'",
                raw
            )))
        })?;
    Ok((value > 0).then_some(value))
}
