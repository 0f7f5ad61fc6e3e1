//! Oracle backed by a real Chrome tab.

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::Value;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::page_model::parse_product_model;
use super::settle::{Probe, SettleOutcome, SettleWait};
use super::{Oracle, OracleError, OracleState};
use crate::config::{BrowserConfig, SelectorConfig};
use crate::models::{ProductModel, SkuOption};
use crate::utils::{AppError, Result};

/// Driver messages that mean the browser or tab is gone for good.
const DETACHED_MARKERS: [&str; 8] = [
    "connection is closed",
    "connection closed",
    "target closed",
    "no target with given id",
    "underlying connection",
    "channel closed",
    "browser closed",
    "disconnected",
];

/// Map a driver error message onto the oracle's error classes.
pub fn classify_driver_error(message: &str) -> OracleError {
    let lowered = message.to_lowercase();
    if DETACHED_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        OracleError::Detached(message.to_string())
    } else {
        OracleError::Transient(message.to_string())
    }
}

fn js(value: &str) -> String {
    Value::from(value).to_string()
}

const SELECTED_CHECK: &str = r#"
    function isSelected(el){
        var cls = el.getAttribute('class') || '';
        if (/selected|active|checked/i.test(cls)) return true;
        if ((el.getAttribute('aria-checked') || '').toLowerCase() === 'true') return true;
        if ((el.getAttribute('data-selected') || '').toLowerCase() === 'true') return true;
        return false;
    }
    function findOption(itemSel, optionSel, textSel, dim, vid, label){
        var items = document.querySelectorAll(itemSel);
        if (dim >= items.length) return 'missing-dimension';
        var nodes = Array.from(items[dim].querySelectorAll(optionSel));
        for (var i = 0; i < nodes.length; i++){
            var el = nodes[i];
            if (vid){
                if (el.getAttribute('data-vid') === vid) return el;
                continue;
            }
            var span = el.querySelector(textSel);
            var text = span ? (span.getAttribute('title') || span.textContent || '').trim() : '';
            if (text === label) return el;
        }
        return 'missing-option';
    }
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceProbe {
    #[serde(default)]
    price: String,
    #[serde(default)]
    sold_out: bool,
}

pub struct ChromeOracle {
    _browser: Browser,
    tab: Arc<Tab>,
    selectors: SelectorConfig,
    settle: SettleWait,
    page_load_timeout: Duration,
    url: Option<Url>,
    baseline: Vec<SkuOption>,
}

impl ChromeOracle {
    pub fn launch(config: &BrowserConfig, settle: SettleWait) -> Result<Self> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false)
            .idle_browser_timeout(Duration::from_secs(600))
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-background-timer-throttling"),
                OsStr::new("--disable-backgrounding-occluded-windows"),
                OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| AppError::Browser(format!("Failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }
        if let Some(profile) = &config.user_data_dir {
            launch_options.user_data_dir = Some(PathBuf::from(profile));
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| AppError::Browser(format!("Failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| AppError::Browser(format!("Failed to create tab: {}", e)))?;

        if let Some(user_agent) = &config.user_agent {
            tab.set_user_agent(user_agent, None, None)
                .map_err(|e| AppError::Browser(format!("Failed to set user agent: {}", e)))?;
        }

        info!("Browser launched (headless: {})", config.headless);
        Ok(Self {
            _browser: browser,
            tab,
            selectors: config.selectors.clone(),
            settle,
            page_load_timeout: Duration::from_secs(config.page_load_timeout),
            url: None,
            baseline: Vec::new(),
        })
    }

    /// Navigate to the product page and wait for the SKU area to render.
    pub fn open(&mut self, url: &str) -> Result<()> {
        let url = Url::parse(url).map_err(|e| AppError::Parse {
            message: format!("Invalid product URL '{}': {}", url, e),
        })?;
        self.navigate(&url)
            .map_err(|e| AppError::Browser(format!("Failed to open {}: {}", url, e)))?;
        info!("Opened product page {}", url);
        self.url = Some(url);
        Ok(())
    }

    pub fn current_url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Read the variant model from the rendered page.
    pub fn extract_model(&self) -> Result<ProductModel> {
        let html = self
            .tab
            .get_content()
            .map_err(|e| AppError::Browser(format!("Failed to get page content: {}", e)))?;
        parse_product_model(&html, &self.selectors)
    }

    /// Remember the first option of every dimension as the reset target.
    pub fn bind_model(&mut self, model: &ProductModel) {
        self.baseline = model
            .dimensions()
            .iter()
            .filter_map(|d| d.option(0).cloned())
            .collect();
    }

    fn navigate(&self, url: &Url) -> std::result::Result<(), OracleError> {
        self.tab
            .navigate_to(url.as_str())
            .map_err(|e| classify_driver_error(&e.to_string()))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| classify_driver_error(&e.to_string()))?;
        self.tab
            .wait_for_element_with_custom_timeout(&self.selectors.sku_item, self.page_load_timeout)
            .map_err(|e| classify_driver_error(&e.to_string()))?;
        Ok(())
    }

    fn evaluate_string(&self, script: &str) -> std::result::Result<String, OracleError> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| classify_driver_error(&e.to_string()))?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    fn option_call(&self, dimension: usize, option: &SkuOption, body: &str) -> String {
        format!(
            r#"(function(){{
                {helpers}
                var el = findOption({item}, {opt}, {text}, {dim}, {vid}, {label});
                if (typeof el === 'string') return el;
                {body}
            }})()"#,
            helpers = SELECTED_CHECK,
            item = js(&self.selectors.sku_item),
            opt = js(&self.selectors.option),
            text = js(&self.selectors.option_text),
            dim = dimension,
            vid = js(option.value_id.as_deref().unwrap_or("")),
            label = js(&option.label),
            body = body,
        )
    }

    fn price_script(&self) -> String {
        let fallbacks = Value::from(self.selectors.price_fallbacks.clone()).to_string();
        format!(
            r#"(function(mainSel, symSel, alts, soldSel){{
                function text(el){{ return el && el.textContent ? el.textContent.trim() : ''; }}
                var soldOut = false;
                try {{ soldOut = !!(soldSel && document.querySelector(soldSel)); }} catch (e) {{}}
                var price = '';
                try {{
                    var main = text(document.querySelector(mainSel));
                    if (main) {{
                        var sym = symSel ? text(document.querySelector(symSel)) : '';
                        price = (sym || '') + main;
                    }}
                }} catch (e) {{}}
                if (!price) {{
                    for (var i = 0; i < alts.length && !price; i++) {{
                        try {{ price = text(document.querySelector(alts[i])); }} catch (e) {{}}
                    }}
                }}
                return JSON.stringify({{price: price, soldOut: soldOut}});
            }})({main}, {symbol}, {fallbacks}, {sold})"#,
            main = js(&self.selectors.price_main),
            symbol = js(&self.selectors.price_symbol),
            fallbacks = fallbacks,
            sold = js(&self.selectors.sold_out),
        )
    }

    fn image_script(&self) -> String {
        format!(
            r#"(function(imgSel){{
                function pick(img){{
                    if (!img) return '';
                    var u = img.currentSrc || img.getAttribute('src') || '';
                    if (!u || u.indexOf('data:') === 0) {{
                        var set = img.getAttribute('srcset') || '';
                        if (set) u = set.split(',')[0].trim().split(' ')[0];
                    }}
                    if (!u || u.indexOf('data:') === 0) {{
                        u = img.getAttribute('data-src') || img.getAttribute('data-ks-lazyload') || '';
                    }}
                    return u || '';
                }}
                var u = '';
                try {{ u = pick(imgSel ? document.querySelector(imgSel) : null); }} catch (e) {{}}
                if (!u) {{
                    var og = document.querySelector("meta[property='og:image']");
                    if (og) u = og.getAttribute('content') || '';
                }}
                if (u.indexOf('//') === 0) u = 'https:' + u;
                return u;
            }})({img})"#,
            img = js(&self.selectors.main_image),
        )
    }
}

#[async_trait]
impl Oracle for ChromeOracle {
    async fn apply_selection(&self, dimension: usize, option: &SkuOption) -> std::result::Result<(), OracleError> {
        let click = self.option_call(
            dimension,
            option,
            r#"
                if ((el.getAttribute('data-disabled') || '').toLowerCase() === 'true') return 'disabled';
                if (isSelected(el)) return 'already';
                try { el.scrollIntoView({block: 'center', inline: 'center'}); } catch (e) {}
                el.click();
                return 'clicked';
            "#,
        );

        match self.evaluate_string(&click)?.as_str() {
            "already" => {
                debug!("'{}' already selected in dimension {}", option.label, dimension);
                return Ok(());
            }
            "clicked" => {}
            "disabled" => {
                return Err(OracleError::Rejected(format!(
                    "option '{}' is disabled",
                    option.label
                )));
            }
            other => {
                return Err(OracleError::Transient(format!(
                    "could not click '{}' in dimension {}: {}",
                    option.label, dimension, other
                )));
            }
        }

        let confirm = self.option_call(
            dimension,
            option,
            "return isSelected(el) ? 'selected' : 'pending';",
        );
        let outcome = self
            .settle
            .wait_for(|| match self.evaluate_string(&confirm)?.as_str() {
                "selected" => Ok(Probe::Ready(())),
                _ => Ok(Probe::Pending(None)),
            })
            .await?;

        if outcome.is_settled() {
            Ok(())
        } else {
            Err(OracleError::Transient(format!(
                "'{}' did not become selected in dimension {}",
                option.label, dimension
            )))
        }
    }

    async fn is_selected(&self, dimension: usize, option: &SkuOption) -> std::result::Result<bool, OracleError> {
        let check = self.option_call(
            dimension,
            option,
            "return isSelected(el) ? 'selected' : 'not-selected';",
        );
        match self.evaluate_string(&check)?.as_str() {
            "selected" => Ok(true),
            "not-selected" => Ok(false),
            other => Err(OracleError::Transient(format!(
                "could not find '{}' in dimension {}: {}",
                option.label, dimension, other
            ))),
        }
    }

    async fn read_state(&self) -> std::result::Result<OracleState, OracleError> {
        let price_script = self.price_script();
        let price = self
            .settle
            .wait_for(|| {
                let raw = self.evaluate_string(&price_script)?;
                let probe: PriceProbe = serde_json::from_str(&raw).unwrap_or_default();
                if probe.sold_out || !probe.price.is_empty() {
                    Ok(Probe::Ready(probe))
                } else {
                    Ok(Probe::Pending(None))
                }
            })
            .await?;

        let probe = match price {
            SettleOutcome::Settled(probe) => probe,
            SettleOutcome::TimedOut(_) => return Ok(OracleState::unknown()),
        };
        if probe.sold_out {
            return Ok(OracleState::unavailable());
        }

        let image_script = self.image_script();
        let image_url = self
            .settle
            .wait_for(|| {
                let url = self.evaluate_string(&image_script)?;
                Ok(if url.is_empty() {
                    Probe::Pending(None)
                } else {
                    Probe::Ready(url)
                })
            })
            .await?
            .into_value();

        Ok(OracleState::available(probe.price, image_url))
    }

    async fn reset(&self) -> std::result::Result<(), OracleError> {
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| OracleError::Transient("no product page open".to_string()))?;
        self.navigate(url)?;
        for (dimension, option) in self.baseline.iter().enumerate() {
            self.apply_selection(dimension, option).await?;
        }
        debug!("Surface reset to baseline");
        Ok(())
    }
}
