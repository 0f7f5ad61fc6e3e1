//! In-memory surface for headless runs and tests.
//!
//! Behaves like a product page: one active option per dimension, prices keyed by
//! the active combination, and scriptable failures.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use super::{Oracle, OracleError, OracleState};
use crate::models::{Combination, ProductModel, SkuOption};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCall {
    pub dimension: usize,
    pub option: usize,
    /// Whether the call changed the active option.
    pub changed: bool,
}

#[derive(Debug, Clone)]
struct Listing {
    price: Option<String>,
    image_url: Option<String>,
}

#[derive(Debug, Default)]
struct Surface {
    active: Vec<usize>,
    calls: Vec<SelectionCall>,
    attempts: usize,
    reads: usize,
    resets: usize,
    transient_budget: HashMap<(usize, usize), u32>,
    unsettled_budget: HashMap<Combination, u32>,
    detached: bool,
}

pub struct ScriptedOracle {
    model: ProductModel,
    listings: HashMap<Combination, Listing>,
    unavailable: HashSet<Combination>,
    rejected: HashSet<(usize, usize)>,
    detach_after: Option<usize>,
    cascading: bool,
    surface: Mutex<Surface>,
}

impl ScriptedOracle {
    /// Every combination starts priced at `¥{100 + position}.00` with no image,
    /// and the surface starts on the first option of every dimension.
    pub fn new(model: ProductModel) -> Self {
        let radices = model.radices();
        let mut listings = HashMap::new();
        for (position, combination) in crate::generator::generate(&model, None).enumerate() {
            listings.insert(
                combination,
                Listing {
                    price: Some(format!("¥{}.00", 100 + position)),
                    image_url: None,
                },
            );
        }

        Self {
            model,
            listings,
            unavailable: HashSet::new(),
            rejected: HashSet::new(),
            detach_after: None,
            cascading: false,
            surface: Mutex::new(Surface {
                active: vec![0; radices.len()],
                ..Surface::default()
            }),
        }
    }

    pub fn with_price(mut self, combination: Combination, price: Option<&str>) -> Self {
        if let Some(listing) = self.listings.get_mut(&combination) {
            listing.price = price.map(str::to_string);
        }
        self
    }

    pub fn with_image(mut self, combination: Combination, image_url: &str) -> Self {
        if let Some(listing) = self.listings.get_mut(&combination) {
            listing.image_url = Some(image_url.to_string());
        }
        self
    }

    /// The surface refuses to select this option at all.
    pub fn reject_option(mut self, dimension: usize, option: usize) -> Self {
        self.rejected.insert((dimension, option));
        self
    }

    /// The combination can be selected but is reported as not sold.
    pub fn mark_unavailable(mut self, combination: Combination) -> Self {
        self.unavailable.insert(combination);
        self
    }

    /// Applying this option fails transiently `times` times before succeeding.
    pub fn fail_transiently(mut self, dimension: usize, option: usize, times: u32) -> Self {
        self.surface
            .get_mut()
            .transient_budget
            .insert((dimension, option), times);
        self
    }

    /// Reads of this combination do not settle `times` times.
    pub fn unsettled(mut self, combination: Combination, times: u32) -> Self {
        self.surface.get_mut().unsettled_budget.insert(combination, times);
        self
    }

    /// The session disappears on the `attempts`-th apply call (1-based).
    pub fn detach_after(mut self, attempts: usize) -> Self {
        self.detach_after = Some(attempts);
        self
    }

    /// Changing a dimension snaps every later dimension back to its first option.
    pub fn cascading(mut self) -> Self {
        self.cascading = true;
        self
    }

    pub async fn calls(&self) -> Vec<SelectionCall> {
        self.surface.lock().await.calls.clone()
    }

    /// Number of calls that actually changed the surface.
    pub async fn state_changes(&self) -> usize {
        self.surface.lock().await.calls.iter().filter(|c| c.changed).count()
    }

    pub async fn apply_attempts(&self) -> usize {
        self.surface.lock().await.attempts
    }

    pub async fn reads(&self) -> usize {
        self.surface.lock().await.reads
    }

    pub async fn resets(&self) -> usize {
        self.surface.lock().await.resets
    }

    pub async fn active(&self) -> Combination {
        Combination::new(self.surface.lock().await.active.clone())
    }

    fn locate(&self, dimension: usize, option: &SkuOption) -> Result<usize, OracleError> {
        self.model
            .dimension(dimension)
            .and_then(|d| d.position(&option.label))
            .ok_or_else(|| {
                OracleError::Transient(format!(
                    "option '{}' not found in dimension {}",
                    option.label, dimension
                ))
            })
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn apply_selection(&self, dimension: usize, option: &SkuOption) -> Result<(), OracleError> {
        let mut surface = self.surface.lock().await;
        if surface.detached {
            return Err(OracleError::Detached("scripted session closed".into()));
        }

        surface.attempts += 1;
        if self.detach_after.is_some_and(|n| surface.attempts >= n) {
            surface.detached = true;
            return Err(OracleError::Detached("scripted session closed".into()));
        }

        let index = self.locate(dimension, option)?;
        if self.rejected.contains(&(dimension, index)) {
            return Err(OracleError::Rejected(format!("option '{}' is disabled", option.label)));
        }
        if let Some(remaining) = surface.transient_budget.get_mut(&(dimension, index)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(OracleError::Transient("stale element reference".into()));
            }
        }

        let changed = surface.active[dimension] != index;
        surface.active[dimension] = index;
        if changed && self.cascading {
            surface.active[dimension + 1..].iter_mut().for_each(|i| *i = 0);
        }
        surface.calls.push(SelectionCall {
            dimension,
            option: index,
            changed,
        });
        Ok(())
    }

    async fn is_selected(&self, dimension: usize, option: &SkuOption) -> Result<bool, OracleError> {
        let surface = self.surface.lock().await;
        if surface.detached {
            return Err(OracleError::Detached("scripted session closed".into()));
        }
        let index = self.locate(dimension, option)?;
        Ok(surface.active[dimension] == index)
    }

    async fn read_state(&self) -> Result<OracleState, OracleError> {
        let mut surface = self.surface.lock().await;
        if surface.detached {
            return Err(OracleError::Detached("scripted session closed".into()));
        }
        surface.reads += 1;

        let combination = Combination::new(surface.active.clone());
        if let Some(remaining) = surface.unsettled_budget.get_mut(&combination) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(OracleState::unknown());
            }
        }
        if self.unavailable.contains(&combination) {
            return Ok(OracleState::unavailable());
        }

        match self.listings.get(&combination) {
            Some(Listing {
                price: Some(price),
                image_url,
            }) => Ok(OracleState::available(price.clone(), image_url.clone())),
            _ => Ok(OracleState::unknown()),
        }
    }

    async fn reset(&self) -> Result<(), OracleError> {
        let mut surface = self.surface.lock().await;
        if surface.detached {
            return Err(OracleError::Detached("scripted session closed".into()));
        }
        surface.resets += 1;
        surface.active.iter_mut().for_each(|i| *i = 0);
        Ok(())
    }
}
