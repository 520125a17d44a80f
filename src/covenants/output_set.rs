use std::collections::BTreeSet;

/// Set of output indices within the spending transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSet(BTreeSet<usize>);

impl OutputSet {
    /// Every index in `0..count`
    pub fn all(count: usize) -> Self {
        Self((0..count).collect())
    }

    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn intersection(&self, other: &OutputSet) -> OutputSet {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    pub fn union(&self, other: &OutputSet) -> OutputSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn symmetric_difference(&self, other: &OutputSet) -> OutputSet {
        Self(self.0.symmetric_difference(&other.0).copied().collect())
    }

    /// Indices in `0..count` not in this set
    pub fn complement(&self, count: usize) -> OutputSet {
        Self((0..count).filter(|i| !self.0.contains(i)).collect())
    }

    /// Keep the indices for which `predicate` holds
    pub fn filter<F: FnMut(usize) -> bool>(&self, mut predicate: F) -> OutputSet {
        Self(self.0.iter().copied().filter(|i| predicate(*i)).collect())
    }
}

impl FromIterator<usize> for OutputSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
