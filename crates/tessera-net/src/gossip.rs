//! Announcement deduplication.
//!
//! Gossip may deliver the same announcement several times through different
//! peers. The cache remembers recently handled hashes and evicts the oldest
//! once full.

use std::collections::{HashSet, VecDeque};
use tessera_core::ContentHash;

pub struct SeenCache {
    capacity: usize,
    seen: HashSet<ContentHash>,
    order: VecDeque<ContentHash>,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        SeenCache {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `hash`; `false` if it was already present.
    pub fn insert(&mut self, hash: ContentHash) -> bool {
        if !self.seen.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    /// Forget `hash` so a later announcement is handled again.
    pub fn forget(&mut self, hash: &ContentHash) {
        if self.seen.remove(hash) {
            self.order.retain(|h| h != hash);
        }
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.seen.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_and_eviction() {
        let mut cache = SeenCache::new(2);
        let (a, b, c) = (ContentHash::digest(b"a"), ContentHash::digest(b"b"), ContentHash::digest(b"c"));
        assert!(cache.insert(a));
        assert!(!cache.insert(a));
        assert!(cache.insert(b));
        assert!(cache.insert(c));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&a));
        assert!(cache.insert(a));
    }

    #[test]
    fn test_forget() {
        let mut cache = SeenCache::new(4);
        let a = ContentHash::digest(b"a");
        cache.insert(a);
        cache.forget(&a);
        assert!(cache.is_empty());
        assert!(cache.insert(a));
    }
}
