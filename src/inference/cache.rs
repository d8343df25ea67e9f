//! Bounded result cache
//!
//! Keyed by snapshot version and query, so publishing a new snapshot never serves
//! stale rankings; entries of old versions simply age out.

use super::query::{QueryKey, Ranking};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

/// Thread-safe LRU cache of rankings
pub(crate) struct ResultCache {
    cache: Mutex<LruCache<(u64, QueryKey), Ranking>>,
}

impl ResultCache {
    /// `None` when `capacity` is 0, which disables caching
    pub(crate) fn new(capacity: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub(crate) fn get(&self, version: u64, key: &QueryKey) -> Option<Ranking> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(version, key.clone()))
            .cloned()
    }

    pub(crate) fn put(&self, version: u64, key: QueryKey, ranking: Ranking) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put((version, key), ranking);
    }

    pub(crate) fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn clear(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityId, RelationId};
    use crate::inference::query::PartialTriple;

    fn key(head: u32) -> QueryKey {
        QueryKey::Single(
            PartialTriple::Tail {
                head: EntityId(head),
                relation: RelationId(0),
            },
            5,
        )
    }

    fn ranking(version: u64) -> Ranking {
        Ranking {
            snapshot_version: version,
            candidates: Vec::new(),
        }
    }

    #[test]
    fn test_zero_capacity_disables() {
        assert!(ResultCache::new(0).is_none());
    }

    #[test]
    fn test_versions_do_not_collide() {
        let cache = ResultCache::new(4).unwrap();
        cache.put(1, key(0), ranking(1));
        assert_eq!(cache.get(1, &key(0)), Some(ranking(1)));
        assert_eq!(cache.get(2, &key(0)), None);
    }

    #[test]
    fn test_eviction() {
        let cache = ResultCache::new(2).unwrap();
        cache.put(1, key(0), ranking(1));
        cache.put(1, key(1), ranking(1));
        cache.put(1, key(2), ranking(1));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(1, &key(0)).is_none());
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
