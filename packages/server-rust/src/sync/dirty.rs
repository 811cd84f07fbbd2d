//! Concurrent set of fast-store keys that have diverged from the record store.
//!
//! Additions are idempotent; removal is bulk after a successful sync wrote a
//! key back. No ordering guarantees, no per-key timestamps. Kept as its own
//! component so the producer side (consume) and the consumer side (sync) can
//! evolve independently.

use dashmap::DashSet;

/// Set of remaining-key names awaiting write-back.
#[derive(Debug, Default)]
pub struct DirtyKeys {
    keys: DashSet<String>,
}

impl DirtyKeys {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a key dirty. Returns `true` when the key was not already dirty.
    pub fn add(&self, key: impl Into<String>) -> bool {
        self.keys.insert(key.into())
    }

    /// Point-in-time copy of the dirty keys. Concurrent adds during the
    /// snapshot land in either this snapshot or the next one.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.key().clone()).collect()
    }

    /// Removes the given keys. Keys added again after the snapshot was taken
    /// are removed all the same; the next consume re-adds them.
    pub fn remove_all(&self, keys: &[String]) {
        for key in keys {
            self.keys.remove(key);
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
