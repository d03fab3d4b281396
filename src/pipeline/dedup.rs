// src/pipeline/dedup.rs

//! Per-region duplicate suppression.
//!
//! Remembers the fingerprints of warnings delivered while a region has
//! active warnings. The dispatcher clears a region as soon as a fetch cycle
//! reports no warnings for it, so a warning that comes back later is
//! delivered again.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::models::Region;

/// Persisted shape of the cache: region → fingerprints.
pub type CacheSnapshot = BTreeMap<Region, BTreeSet<String>>;

/// Region → set of delivered warning fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupCache {
    entries: HashMap<Region, HashSet<String>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a cache from persisted state.
    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        let entries = snapshot
            .into_iter()
            .filter(|(_, fingerprints)| !fingerprints.is_empty())
            .map(|(region, fingerprints)| (region, fingerprints.into_iter().collect()))
            .collect();
        Self { entries }
    }

    /// Whether the fingerprint was already seen for the region.
    pub fn has(&self, region: &Region, fingerprint: &str) -> bool {
        self.entries
            .get(region)
            .is_some_and(|fingerprints| fingerprints.contains(fingerprint))
    }

    /// Remember a fingerprint. Returns `true` if it was not known yet.
    pub fn mark(&mut self, region: &Region, fingerprint: &str) -> bool {
        self.entries
            .entry(region.clone())
            .or_default()
            .insert(fingerprint.to_string())
    }

    /// Forget all fingerprints of a region. Returns `true` if any existed.
    pub fn clear(&mut self, region: &Region) -> bool {
        self.entries.remove(region).is_some()
    }

    pub fn region_count(&self) -> usize {
        self.entries.len()
    }

    pub fn fingerprint_count(&self) -> usize {
        self.entries.values().map(HashSet::len).sum()
    }

    /// Sorted copy of the current state.
    pub fn snapshot(&self) -> CacheSnapshot {
        self.entries
            .iter()
            .map(|(region, fingerprints)| (region.clone(), fingerprints.iter().cloned().collect()))
            .collect()
    }
}
