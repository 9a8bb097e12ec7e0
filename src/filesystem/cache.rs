use std::fmt;
use std::num::NonZeroUsize;

use hashlink::LruCache;
use tracing::debug;

use crate::filesystem::node::NodeId;
use crate::filesystem::path::TreePath;

/// Bounded path -> node lookup table with least-recently-used eviction.
///
/// Only positive lookups are stored, so creating a node never has to touch the
/// cache. Entries never own nodes; a handle stays valid only until the subtree
/// containing it is invalidated.
pub struct PathCache {
    entries: LruCache<TreePath, NodeId>,
    counters: CacheCounters,
}

impl fmt::Debug for PathCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.entries.capacity())
            .field("counters", &self.counters)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl PathCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity.get()),
            counters: CacheCounters::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counters(&self) -> CacheCounters {
        self.counters
    }

    pub fn get(&mut self, path: &TreePath) -> Option<NodeId> {
        match self.entries.get(path) {
            Some(id) => {
                self.counters.hits += 1;
                Some(*id)
            }
            None => {
                self.counters.misses += 1;
                None
            }
        }
    }

    /// Lookup that neither counts nor refreshes recency.
    pub fn peek(&self, path: &TreePath) -> Option<NodeId> {
        self.entries.peek(path).copied()
    }

    pub fn put(&mut self, path: &TreePath, id: NodeId) {
        let full = self.entries.len() >= self.entries.capacity();
        if full && !self.entries.contains_key(path) {
            if let Some((evicted, _)) = self.entries.remove_lru() {
                self.counters.evictions += 1;
                debug!("Evicted {} from path cache", evicted);
            }
        }
        self.entries.insert(path.clone(), id);
        self.counters.insertions += 1;
    }

    pub fn invalidate(&mut self, path: &TreePath) -> bool {
        let removed = self.entries.remove(path).is_some();
        if removed {
            self.counters.invalidations += 1;
        }
        removed
    }

    /// Drops `path` and every cached path below it. Returns the number of
    /// entries removed.
    pub fn invalidate_subtree(&mut self, path: &TreePath) -> usize {
        if path.is_root() {
            let removed = self.entries.len();
            self.entries.clear();
            self.counters.invalidations += removed as u64;
            debug!("Invalidated all {} cached paths", removed);
            return removed;
        }

        let doomed = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(path))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();

        for key in &doomed {
            self.entries.remove(key);
        }
        self.counters.invalidations += doomed.len() as u64;
        debug!("Invalidated {} cached paths under {}", doomed.len(), path);
        doomed.len()
    }

    /// Cached entries from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&TreePath, NodeId)> {
        self.entries.iter().map(|(key, id)| (key, *id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> TreePath {
        TreePath::parse(raw).expect("test path should parse")
    }

    fn cache(capacity: usize) -> PathCache {
        PathCache::new(NonZeroUsize::new(capacity).expect("capacity is non-zero"))
    }

    #[test]
    fn get_counts_hits_and_misses() {
        let mut cache = cache(4);
        cache.put(&path("/a"), NodeId::new(1));

        assert_eq!(cache.get(&path("/a")), Some(NodeId::new(1)));
        assert_eq!(cache.get(&path("/b")), None);

        let counters = cache.counters();
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.insertions, 1);
    }

    #[test]
    fn evicts_least_recently_used_entry() {
        let mut cache = cache(2);
        cache.put(&path("/a"), NodeId::new(1));
        cache.put(&path("/b"), NodeId::new(2));
        // Touch /a so /b becomes the eviction candidate.
        assert!(cache.get(&path("/a")).is_some());
        cache.put(&path("/c"), NodeId::new(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&path("/b")), None);
        assert_eq!(cache.peek(&path("/a")), Some(NodeId::new(1)));
        assert_eq!(cache.peek(&path("/c")), Some(NodeId::new(3)));
        assert_eq!(cache.counters().evictions, 1);
    }

    #[test]
    fn reinserting_existing_key_does_not_evict() {
        let mut cache = cache(2);
        cache.put(&path("/a"), NodeId::new(1));
        cache.put(&path("/b"), NodeId::new(2));
        cache.put(&path("/a"), NodeId::new(9));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&path("/a")), Some(NodeId::new(9)));
        assert_eq!(cache.counters().evictions, 0);
    }

    #[test]
    fn invalidate_subtree_respects_segment_boundaries() {
        let mut cache = cache(8);
        for (raw, id) in [("/a", 1), ("/a/b", 2), ("/a/b/c", 3), ("/ab", 4), ("/z", 5)] {
            cache.put(&path(raw), NodeId::new(id));
        }

        assert_eq!(cache.invalidate_subtree(&path("/a")), 3);
        assert_eq!(cache.peek(&path("/a/b/c")), None);
        assert_eq!(cache.peek(&path("/ab")), Some(NodeId::new(4)));
        assert_eq!(cache.peek(&path("/z")), Some(NodeId::new(5)));
    }

    #[test]
    fn invalidating_root_clears_everything() {
        let mut cache = cache(8);
        cache.put(&path("/"), NodeId::ROOT);
        cache.put(&path("/a"), NodeId::new(1));

        assert_eq!(cache.invalidate_subtree(&TreePath::root()), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_single_entry() {
        let mut cache = cache(4);
        cache.put(&path("/a"), NodeId::new(1));
        cache.put(&path("/a/b"), NodeId::new(2));

        assert!(cache.invalidate(&path("/a")));
        assert!(!cache.invalidate(&path("/a")));
        assert_eq!(cache.peek(&path("/a/b")), Some(NodeId::new(2)));
    }
}
