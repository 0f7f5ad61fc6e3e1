use serde::{Deserialize, Serialize};
use std::fmt;

/// One option index per dimension, in dimension declaration order.
///
/// The derived ordering is lexicographic, which for tuples of equal length is
/// exactly the mixed-radix generation order (last dimension varies fastest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Combination(Vec<usize>);

impl Combination {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn get(&self, dimension: usize) -> Option<usize> {
        self.0.get(dimension).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<usize>> for Combination {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "({})", parts.join(","))
    }
}

/// What the controller believes is active on the surface, per dimension.
/// `None` means unknown and forces a fresh apply for that dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    active: Vec<Option<usize>>,
}

impl Selection {
    pub fn unknown(dimensions: usize) -> Self {
        Self {
            active: vec![None; dimensions],
        }
    }

    /// First option of every dimension, the state `Oracle::reset` restores.
    pub fn baseline(dimensions: usize) -> Self {
        Self {
            active: vec![Some(0); dimensions],
        }
    }

    pub fn get(&self, dimension: usize) -> Option<usize> {
        self.active.get(dimension).copied().flatten()
    }

    pub fn set(&mut self, dimension: usize, option: usize) {
        if let Some(slot) = self.active.get_mut(dimension) {
            *slot = Some(option);
        }
    }

    pub fn forget(&mut self, dimension: usize) {
        if let Some(slot) = self.active.get_mut(dimension) {
            *slot = None;
        }
    }

    pub fn forget_all(&mut self) {
        self.active.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn is_complete(&self) -> bool {
        self.active.iter().all(Option::is_some)
    }

    pub fn matches(&self, combination: &Combination) -> bool {
        self.diff(combination).is_empty()
    }

    /// Dimensions whose active option differs from `combination`, ascending.
    pub fn diff(&self, combination: &Combination) -> Vec<usize> {
        combination
            .indices()
            .iter()
            .enumerate()
            .filter(|&(dimension, &option)| self.get(dimension) != Some(option))
            .map(|(dimension, _)| dimension)
            .collect()
    }
}
