//! Analysis result cache
//!
//! Results are keyed by standard pair and carry the graph fingerprint
//! they were computed against. A lookup compares that fingerprint with
//! the live one, so the cache can hold arbitrarily old entries without
//! ever serving one as fresh. A reverse index from graph resources to
//! dependent pairs supports targeted invalidation when a node, edge or
//! standard is deleted.

use std::collections::HashSet;
use std::path::Path;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::resolve::{MapAnalysisResult, PairKey};

mod persist;
use persist::PersistentCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Conflicting concurrent write for pair '{0}'")]
    WriteConflict(PairKey),

    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a cache lookup against the current graph fingerprint
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Cached result matches the live graph
    Hit(MapAnalysisResult),
    /// Cached result exists but the graph has changed since
    Stale(MapAnalysisResult),
    Miss,
}

/// Outcome of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The graph changed while the result was being computed, so the
    /// result was discarded without touching the cache
    StaleSkipped,
    /// A fresher result for the same pair is already cached
    Conflict,
}

/// Fingerprint-checked cache of map analysis results.
///
/// All methods take `&self`; the cache is safe to share across tasks.
pub struct AnalysisCache {
    entries: DashMap<PairKey, MapAnalysisResult>,
    by_resource: DashMap<String, HashSet<PairKey>>,
    persist: Option<PersistentCache>,
}

impl AnalysisCache {
    /// In-memory cache with no backing file
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            by_resource: DashMap::new(),
            persist: None,
        }
    }

    /// Cache backed by a SQLite file, preloaded with whatever survived
    /// the last run. Preloaded entries still go through the fingerprint
    /// check on lookup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let persist = PersistentCache::open(path)?;
        let cache = Self {
            entries: DashMap::new(),
            by_resource: DashMap::new(),
            persist: None,
        };
        for result in persist.load_all()? {
            cache.index_resources(&result);
            cache.entries.insert(result.pair.clone(), result);
        }
        Ok(Self {
            persist: Some(persist),
            ..cache
        })
    }

    /// Look up the analysis for a pair against the live fingerprint.
    pub fn lookup(&self, pair: &PairKey, current_fingerprint: u64) -> Lookup {
        match self.entries.get(pair) {
            Some(entry) if entry.fingerprint == current_fingerprint => {
                Lookup::Hit(entry.clone())
            }
            Some(entry) => Lookup::Stale(entry.clone()),
            None => Lookup::Miss,
        }
    }

    /// Store a result unless it is already out of date.
    ///
    /// A result whose fingerprint no longer matches the live graph is
    /// dropped with `StaleSkipped`. A cached entry that is both newer
    /// and from a different graph generation wins over the incoming
    /// result with `Conflict`; the caller may refresh its fingerprint
    /// and retry.
    pub fn try_put(
        &self,
        result: MapAnalysisResult,
        current_fingerprint: u64,
    ) -> Result<PutOutcome, CacheError> {
        if result.fingerprint != current_fingerprint {
            tracing::debug!(
                pair = %result.pair,
                "graph changed during analysis, result not cached"
            );
            return Ok(PutOutcome::StaleSkipped);
        }

        // Index before inserting. A concurrent invalidation may then
        // see a pair with no entry, which is harmless, while the
        // opposite order could leave an entry that invalidation misses.
        self.index_resources(&result);

        match self.entries.entry(result.pair.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if existing.fingerprint != result.fingerprint
                    && existing.computed_at >= result.computed_at
                {
                    return Ok(PutOutcome::Conflict);
                }
                if let Some(persist) = &self.persist {
                    persist.put(&result)?;
                }
                occupied.insert(result);
            }
            Entry::Vacant(vacant) => {
                if let Some(persist) = &self.persist {
                    persist.put(&result)?;
                }
                vacant.insert(result);
            }
        }
        Ok(PutOutcome::Stored)
    }

    /// Drop every cached analysis that depends on the given resource.
    ///
    /// The resource may be a node id, an edge resource id, a standard
    /// key or a bare standard name. Returns the number of analyses
    /// removed.
    pub fn invalidate_resource(&self, resource: &str) -> usize {
        let Some((_, pairs)) = self.by_resource.remove(resource) else {
            return 0;
        };

        let mut removed = 0;
        for pair in &pairs {
            if self.entries.remove(pair).is_some() {
                removed += 1;
            }
            if let Some(persist) = &self.persist {
                if let Err(err) = persist.delete(pair) {
                    tracing::warn!(%pair, %err, "failed to drop cached analysis from disk");
                }
            }
        }

        // Scrub the removed pairs from every other resource bucket.
        // Keys are collected first; removing while iterating a DashMap
        // can deadlock on the shard lock.
        let keys: Vec<String> = self.by_resource.iter().map(|r| r.key().clone()).collect();
        for key in keys {
            let emptied = match self.by_resource.get_mut(&key) {
                Some(mut bucket) => {
                    bucket.retain(|p| !pairs.contains(p));
                    bucket.is_empty()
                }
                None => false,
            };
            if emptied {
                self.by_resource.remove_if(&key, |_, bucket| bucket.is_empty());
            }
        }

        tracing::debug!(resource, removed, "invalidated cached analyses");
        removed
    }

    /// Cached result for a pair, regardless of freshness
    pub fn get(&self, pair: &PairKey) -> Option<MapAnalysisResult> {
        self.entries.get(pair).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything, memory and disk
    pub fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        self.by_resource.clear();
        if let Some(persist) = &self.persist {
            persist.clear()?;
        }
        Ok(())
    }

    fn index_resources(&self, result: &MapAnalysisResult) {
        for resource in result.resources() {
            self.by_resource
                .entry(resource)
                .or_default()
                .insert(result.pair.clone());
        }
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeKind, NodeId, StandardKey};
    use crate::resolve::{Mapping, PathEdge, Strength};
    use chrono::{Duration, Utc};

    fn pair() -> PairKey {
        PairKey::new(
            StandardKey::new("ASVS").with_version("4.0"),
            StandardKey::new("CWE"),
        )
    }

    fn result_at(fingerprint: u64, age_secs: i64) -> MapAnalysisResult {
        MapAnalysisResult {
            pair: pair(),
            mappings: vec![Mapping {
                source: NodeId::from("ASVS@4.0:V2.1.1"),
                target: NodeId::from("CWE:521"),
                nodes: vec![
                    NodeId::from("ASVS@4.0:V2.1.1"),
                    NodeId::from("CRE:170-772"),
                    NodeId::from("CWE:521"),
                ],
                edges: vec![
                    PathEdge {
                        source: NodeId::from("CRE:170-772"),
                        target: NodeId::from("ASVS@4.0:V2.1.1"),
                        kind: EdgeKind::LinksTo,
                        confidence: 1.0,
                    },
                    PathEdge {
                        source: NodeId::from("CRE:170-772"),
                        target: NodeId::from("CWE:521"),
                        kind: EdgeKind::LinksTo,
                        confidence: 1.0,
                    },
                ],
                confidence: 1.0,
                strength: Strength::Direct,
            }],
            fingerprint,
            computed_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    // === Scenario: lookup tracks the live fingerprint ===

    #[test]
    fn test_lookup_hit_stale_miss() {
        let cache = AnalysisCache::new();
        assert!(matches!(cache.lookup(&pair(), 1), Lookup::Miss));

        cache.try_put(result_at(1, 0), 1).unwrap();
        assert!(matches!(cache.lookup(&pair(), 1), Lookup::Hit(_)));
        assert!(matches!(cache.lookup(&pair(), 2), Lookup::Stale(_)));
    }

    // === Scenario: a result computed against an old graph is discarded ===

    #[test]
    fn test_stale_put_is_skipped_without_mutation() {
        let cache = AnalysisCache::new();
        let outcome = cache.try_put(result_at(1, 0), 2).unwrap();
        assert_eq!(outcome, PutOutcome::StaleSkipped);
        assert!(matches!(cache.lookup(&pair(), 2), Lookup::Miss));

        // A good entry is never displaced by a stale write
        cache.try_put(result_at(2, 0), 2).unwrap();
        let outcome = cache.try_put(result_at(1, 0), 2).unwrap();
        assert_eq!(outcome, PutOutcome::StaleSkipped);
        match cache.lookup(&pair(), 2) {
            Lookup::Hit(cached) => assert_eq!(cached.fingerprint, 2),
            other => panic!("expected a hit, got {other:?}"),
        }
    }

    // === Scenario: a fresher concurrent write wins ===

    #[test]
    fn test_conflicting_older_write_is_rejected() {
        let cache = AnalysisCache::new();
        cache.try_put(result_at(2, 0), 2).unwrap();

        // Computed earlier, against an older graph generation, and the
        // caller still believes that generation is live
        let outcome = cache.try_put(result_at(1, 60), 1).unwrap();
        assert_eq!(outcome, PutOutcome::Conflict);
        match cache.lookup(&pair(), 2) {
            Lookup::Hit(cached) => assert_eq!(cached.fingerprint, 2),
            other => panic!("expected a hit, got {other:?}"),
        }
    }

    #[test]
    fn test_same_fingerprint_overwrites() {
        let cache = AnalysisCache::new();
        cache.try_put(result_at(1, 60), 1).unwrap();
        let outcome = cache.try_put(result_at(1, 0), 1).unwrap();
        assert_eq!(outcome, PutOutcome::Stored);
    }

    // === Scenario: deleting a resource drops dependent analyses ===

    #[test]
    fn test_invalidate_by_node_edge_and_standard() {
        let cache = AnalysisCache::new();
        cache.try_put(result_at(1, 0), 1).unwrap();

        assert_eq!(cache.invalidate_resource("CRE:170-772"), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.invalidate_resource("CRE:170-772"), 0, "reverse index is cleaned");

        cache.try_put(result_at(1, 0), 1).unwrap();
        assert_eq!(
            cache.invalidate_resource("CRE:170-772|links-to|CWE:521"),
            1
        );

        cache.try_put(result_at(1, 0), 1).unwrap();
        assert_eq!(cache.invalidate_resource("ASVS"), 1, "bare standard name works");

        cache.try_put(result_at(1, 0), 1).unwrap();
        assert_eq!(cache.invalidate_resource("ASVS@4.0"), 1);

        assert_eq!(cache.invalidate_resource("CWE:9999"), 0);
    }

    // === Scenario: cached analyses survive a restart ===

    #[test]
    fn test_persisted_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyses.db");
        {
            let cache = AnalysisCache::open(&path).unwrap();
            assert_eq!(cache.try_put(result_at(1, 0), 1).unwrap(), PutOutcome::Stored);
        }

        let cache = AnalysisCache::open(&path).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.lookup(&pair(), 1), Lookup::Hit(_)));
        // The graph moved on while the process was down
        assert!(matches!(cache.lookup(&pair(), 9), Lookup::Stale(_)));

        // Invalidation reaches the reloaded reverse index
        assert_eq!(cache.invalidate_resource("CWE:521"), 1);
        drop(cache);
        let cache = AnalysisCache::open(&path).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_empties_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyses.db");
        let cache = AnalysisCache::open(&path).unwrap();
        cache.try_put(result_at(1, 0), 1).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty());

        drop(cache);
        assert!(AnalysisCache::open(&path).unwrap().is_empty());
    }
}
