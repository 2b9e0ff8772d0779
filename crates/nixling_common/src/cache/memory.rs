//! Bounded in-process LRU tier.

use super::CacheClass;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    class: CacheClass,
    expires_at: Instant,
}

/// Outcome of a memory lookup
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MemoryLookup {
    Hit(String),
    /// Present but past its expiry; already purged
    Expired,
    Miss,
}

pub(crate) struct MemoryTier {
    entries: LruCache<String, MemoryEntry>,
    evictions: u64,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            evictions: 0,
        }
    }

    pub fn get(&mut self, key: &str, now: Instant) -> MemoryLookup {
        match self.entries.get(key) {
            None => return MemoryLookup::Miss,
            Some(entry) if now < entry.expires_at => {
                return MemoryLookup::Hit(entry.value.clone());
            }
            Some(_) => {}
        }
        self.entries.pop(key);
        MemoryLookup::Expired
    }

    pub fn put(&mut self, key: String, class: CacheClass, value: String, ttl: Duration, now: Instant) {
        let entry = MemoryEntry {
            value,
            class,
            expires_at: now + ttl,
        };
        if let Some((evicted, _)) = self.entries.push(key.clone(), entry) {
            // push hands back the old value on replacement too
            if evicted != key {
                self.evictions += 1;
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.pop(key).is_some()
    }

    pub fn remove_class(&mut self, class: CacheClass) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.class == class)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.entries.pop(key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_hit_then_expired() {
        let mut tier = MemoryTier::new(4);
        let now = Instant::now();
        tier.put("a".into(), CacheClass::PackageSearch, "1".into(), TTL, now);

        assert_eq!(tier.get("a", now), MemoryLookup::Hit("1".into()));
        assert_eq!(tier.get("a", now + TTL), MemoryLookup::Expired);
        assert_eq!(tier.get("a", now), MemoryLookup::Miss);
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut tier = MemoryTier::new(2);
        let now = Instant::now();
        tier.put("a".into(), CacheClass::PackageSearch, "1".into(), TTL, now);
        tier.put("b".into(), CacheClass::PackageSearch, "2".into(), TTL, now);
        // Touch a so b is the eviction victim
        tier.get("a", now);
        tier.put("c".into(), CacheClass::PackageSearch, "3".into(), TTL, now);

        assert_eq!(tier.len(), 2);
        assert_eq!(tier.evictions(), 1);
        assert_eq!(tier.get("b", now), MemoryLookup::Miss);
        assert!(matches!(tier.get("a", now), MemoryLookup::Hit(_)));
    }

    #[test]
    fn test_replacement_is_not_eviction() {
        let mut tier = MemoryTier::new(2);
        let now = Instant::now();
        tier.put("a".into(), CacheClass::PackageSearch, "1".into(), TTL, now);
        tier.put("a".into(), CacheClass::PackageSearch, "2".into(), TTL, now);
        assert_eq!(tier.evictions(), 0);
        assert_eq!(tier.get("a", now), MemoryLookup::Hit("2".into()));
    }

    #[test]
    fn test_remove_class() {
        let mut tier = MemoryTier::new(8);
        let now = Instant::now();
        tier.put("a".into(), CacheClass::InstalledListing, "1".into(), TTL, now);
        tier.put("b".into(), CacheClass::Generations, "2".into(), TTL, now);
        tier.put("c".into(), CacheClass::PackageSearch, "3".into(), TTL, now);

        assert_eq!(tier.remove_class(CacheClass::InstalledListing), 1);
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let tier = MemoryTier::new(0);
        assert_eq!(tier.capacity(), 1);
    }
}
