//! Shared atoms for the engine's name vocabulary
//!
//! Scope names, identifiers and template names repeat across every compiled
//! template, so `Variable` construction routes them through one process-wide
//! table of `Arc<str>` atoms. Equal names share a single allocation, which
//! keeps variable clones cheap and symbol-set comparisons pointer-fast.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

static TABLE: Lazy<AtomTable> = Lazy::new(AtomTable::default);

/// Concurrent, grow-only table of name atoms
#[derive(Default)]
pub(crate) struct AtomTable {
    entries: DashMap<String, Arc<str>>,
}

impl AtomTable {
    /// The shared atom for `name`, minting one on first sight.
    ///
    /// The read probe keeps the common case lock-light; the entry fallback
    /// makes concurrent first sightings converge on one atom.
    pub(crate) fn resolve(&self, name: &str) -> Arc<str> {
        if let Some(found) = self.entries.get(name) {
            return Arc::clone(&found);
        }
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::from(name))
            .clone()
    }

    #[allow(dead_code)] // Used in tests
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The shared atom for `name`
#[inline]
pub(crate) fn atom(name: &str) -> Arc<str> {
    TABLE.resolve(name)
}
