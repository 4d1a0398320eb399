use std::collections::HashMap;

use conduit_core::RowId;

/// Job-scoped map from an external identifier to an internal row id.
///
/// Only successful lookups are cached; a miss is retried on the next record
/// since the referenced row may be created later in the same job.
#[derive(Default)]
pub struct ResolutionCache {
    entries: HashMap<String, RowId>,
    hits: u64,
    misses: u64,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &str) -> Option<RowId> {
        match self.entries.get(key) {
            Some(id) => {
                self.hits += 1;
                Some(*id)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: &str, id: RowId) {
        self.entries.insert(key.to_string(), id);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_miss_counting() {
        let mut cache = ResolutionCache::new();
        assert!(cache.get("u1").is_none());
        assert_eq!(cache.misses(), 1);

        cache.insert("u1", 42);
        assert_eq!(cache.get("u1"), Some(42));
        assert_eq!(cache.get("u1"), Some(42));
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.len(), 1);
    }
}
