//! Per-field revision log.
//!
//! A [`RevisionLog`] is an append-only sequence of [`Revision`]s kept in
//! version order. The log only stores; ordering and duplicate suppression are
//! enforced by the merge engine before anything is appended.

use crate::revision::Revision;
use serde::{Deserialize, Serialize};

/// Ordered history of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionLog<T, V> {
    entries: Vec<Revision<T, V>>,
}

impl<T, V> Default for RevisionLog<T, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T, V: Ord> RevisionLog<T, V> {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry with the greatest version.
    pub fn latest(&self) -> Option<&Revision<T, V>> {
        self.entries.last()
    }

    /// The entry with the greatest version `<= target`.
    ///
    /// Returns `None` when the log is empty or every entry is newer than
    /// `target`.
    pub fn at(&self, target: &V) -> Option<&Revision<T, V>> {
        let idx = self.entries.partition_point(|r| r.version() <= target);
        idx.checked_sub(1).map(|i| &self.entries[i])
    }

    /// Append a revision. Callers must keep versions strictly increasing.
    pub fn append(&mut self, value: T, version: V) {
        debug_assert!(self.latest().map_or(true, |r| *r.version() < version));
        self.entries.push(Revision::new(value, version));
    }

    /// Whether versions are strictly increasing across the log.
    pub fn is_ordered(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].version() < w[1].version())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Revision<T, V>> {
        self.entries.iter()
    }

    /// Versions in log order.
    pub fn versions(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(Revision::version)
    }
}

impl<T, V: Ord> FromIterator<Revision<T, V>> for RevisionLog<T, V> {
    fn from_iter<I: IntoIterator<Item = Revision<T, V>>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
