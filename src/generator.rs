use crate::models::{Combination, ProductModel};

/// Lazy mixed-radix enumeration of a product's combinations.
///
/// The last dimension varies fastest. This order is shared with the replay
/// flow, which writes prices back by position.
#[derive(Debug, Clone)]
pub struct Combinations {
    radices: Vec<usize>,
    next: Option<Vec<usize>>,
    remaining: usize,
}

impl Combinations {
    fn new(radices: Vec<usize>, cap: Option<usize>) -> Self {
        let total = radices
            .iter()
            .fold(1usize, |acc, &r| acc.saturating_mul(r));
        let remaining = cap.map_or(total, |cap| cap.min(total));
        let next = (remaining > 0).then(|| vec![0; radices.len()]);
        Self {
            radices,
            next,
            remaining,
        }
    }

    fn advance(&self, current: &[usize]) -> Option<Vec<usize>> {
        let mut indices = current.to_vec();
        for dimension in (0..indices.len()).rev() {
            indices[dimension] += 1;
            if indices[dimension] < self.radices[dimension] {
                return Some(indices);
            }
            indices[dimension] = 0;
        }
        None
    }
}

impl Iterator for Combinations {
    type Item = Combination;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next.take()?;
        self.remaining -= 1;
        if self.remaining > 0 {
            self.next = self.advance(&current);
        }
        Some(Combination::new(current))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Combinations {}

/// Combinations of `model` in generation order, truncated to the first `cap` if given.
pub fn generate(model: &ProductModel, cap: Option<usize>) -> Combinations {
    Combinations::new(model.radices(), cap)
}

/// Restartable source of [`Combinations`] plus position arithmetic.
#[derive(Debug, Clone)]
pub struct CombinationGenerator {
    radices: Vec<usize>,
    cap: Option<usize>,
}

impl CombinationGenerator {
    pub fn new(model: &ProductModel) -> Self {
        Self {
            radices: model.radices(),
            cap: None,
        }
    }

    pub fn with_cap(mut self, cap: Option<usize>) -> Self {
        self.cap = cap;
        self
    }

    /// A fresh pass from the first combination.
    pub fn iter(&self) -> Combinations {
        Combinations::new(self.radices.clone(), self.cap)
    }

    /// Uncapped size of the combination space.
    pub fn total(&self) -> usize {
        self.radices.iter().fold(1usize, |acc, &r| acc.saturating_mul(r))
    }

    /// Number of combinations a pass yields.
    pub fn len(&self) -> usize {
        self.cap.map_or(self.total(), |cap| cap.min(self.total()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of `combination` in the uncapped order.
    pub fn position_of(&self, combination: &Combination) -> Option<usize> {
        if combination.len() != self.radices.len() {
            return None;
        }
        let mut position = 0usize;
        for (&index, &radix) in combination.indices().iter().zip(&self.radices) {
            if index >= radix {
                return None;
            }
            position = position.checked_mul(radix)?.checked_add(index)?;
        }
        Some(position)
    }

    /// Combination at `position` in the uncapped order.
    pub fn combination_at(&self, position: usize) -> Option<Combination> {
        if position >= self.total() {
            return None;
        }
        let mut rest = position;
        let mut indices = vec![0; self.radices.len()];
        for (slot, &radix) in indices.iter_mut().zip(&self.radices).rev() {
            *slot = rest % radix;
            rest /= radix;
        }
        Some(Combination::new(indices))
    }
}

impl IntoIterator for &CombinationGenerator {
    type Item = Combination;
    type IntoIter = Combinations;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
