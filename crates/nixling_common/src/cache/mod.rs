//! Two-tier cache: a bounded in-memory LRU in front of a SQLite store.
//!
//! Reads check memory, then disk; a disk hit is promoted into memory for
//! whatever is left of its recorded lifetime. Writes go to both tiers and
//! invalidations are committed to disk before they return. Within a process the
//! memory tier is authoritative. Disk problems are logged and degrade to
//! cache misses, never to errors.

mod disk;
pub mod key;
mod memory;

pub use key::content_key;

use crate::config::CacheSettings;
use crate::lock_or_recover;
use disk::{DiskLookup, DiskTier};
use memory::{MemoryLookup, MemoryTier};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Entry classes, each with its own staleness tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheClass {
    /// Package resolutions and search results
    PackageSearch,
    /// Output of installed-package listings
    InstalledListing,
    /// Generation listings used for snapshots and rollback
    Generations,
}

impl CacheClass {
    pub const ALL: [CacheClass; 3] = [
        CacheClass::PackageSearch,
        CacheClass::InstalledListing,
        CacheClass::Generations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheClass::PackageSearch => "package_search",
            CacheClass::InstalledListing => "installed_listing",
            CacheClass::Generations => "generations",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.as_str() == s)
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries currently held in memory
    pub size: usize,
    pub capacity: usize,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub evictions: u64,
    pub invalidations: u64,
    /// Rows in the disk tier, if it is enabled
    pub disk_entries: Option<u64>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct ClassTtls {
    package_search: Duration,
    installed_listing: Duration,
    generations: Duration,
}

/// Process-wide cache. Create once, share behind an `Arc`, call
/// [`CacheManager::shutdown`] (or drop it) to flush the disk tier.
pub struct CacheManager {
    memory: Mutex<MemoryTier>,
    disk: Option<DiskTier>,
    ttls: ClassTtls,
    counters: Counters,
}

impl CacheManager {
    /// Build from settings, opening the disk tier at its configured path
    pub fn new(settings: &CacheSettings) -> Self {
        let disk_path = settings.effective_disk_path();
        Self::build(settings, disk_path.as_deref())
    }

    /// Build with the disk tier at an explicit path
    pub fn with_disk_path(settings: &CacheSettings, path: &Path) -> Self {
        Self::build(settings, Some(path))
    }

    /// Memory tier only
    pub fn in_memory(settings: &CacheSettings) -> Self {
        Self::build(settings, None)
    }

    fn build(settings: &CacheSettings, disk_path: Option<&Path>) -> Self {
        let disk = disk_path.and_then(|path| DiskTier::open(path, settings.effective_disk_write_budget()));
        Self {
            memory: Mutex::new(MemoryTier::new(settings.effective_capacity())),
            disk,
            ttls: ClassTtls {
                package_search: settings.effective_package_ttl(),
                installed_listing: settings.effective_installed_ttl(),
                generations: settings.effective_generations_ttl(),
            },
            counters: Counters::default(),
        }
    }

    /// Default TTL for a class
    pub fn ttl_for(&self, class: CacheClass) -> Duration {
        match class {
            CacheClass::PackageSearch => self.ttls.package_search,
            CacheClass::InstalledListing => self.ttls.installed_listing,
            CacheClass::Generations => self.ttls.generations,
        }
    }

    pub fn disk_path(&self) -> Option<PathBuf> {
        self.disk.as_ref().map(|disk| disk.path().to_path_buf())
    }

    /// Look a key up in memory, then on disk
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(target: "nixling::cache", key, error = %e, "Undecodable cache entry dropped");
                self.invalidate(key);
                None
            }
        }
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        if let MemoryLookup::Hit(value) = lock_or_recover(&self.memory).get(key, Instant::now()) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        if let Some(disk) = &self.disk {
            match disk.get(key, now_ms()) {
                Ok(DiskLookup::Hit { value, class, remaining }) => {
                    self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, class = class.as_str(), "Promoting disk hit");
                    lock_or_recover(&self.memory).put(
                        key.to_string(),
                        class,
                        value.clone(),
                        remaining,
                        Instant::now(),
                    );
                    return Some(value);
                }
                Ok(DiskLookup::Expired) | Ok(DiskLookup::Miss) => {}
                Err(e) => {
                    warn!(target: "nixling::cache", key, error = %e, "Disk cache read failed, treating as miss");
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value with the class's default TTL
    pub fn put<T: Serialize>(&self, key: &str, class: CacheClass, value: &T) {
        self.set(key, class, value, self.ttl_for(class));
    }

    /// Store a value in both tiers with an explicit TTL
    pub fn set<T: Serialize>(&self, key: &str, class: CacheClass, value: &T, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(target: "nixling::cache", key, error = %e, "Value not cacheable");
                return;
            }
        };

        lock_or_recover(&self.memory).put(key.to_string(), class, raw.clone(), ttl, Instant::now());

        if let Some(disk) = &self.disk {
            if let Err(e) = disk.put(key, class, &raw, now_ms(), ttl) {
                warn!(target: "nixling::cache", key, error = %e, "Disk cache write failed");
            }
        }
    }

    /// Drop one key from both tiers. Returns whether memory held it.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = lock_or_recover(&self.memory).remove(key);
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.delete(key) {
                warn!(target: "nixling::cache", key, error = %e, "Disk cache delete failed");
            }
        }
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        removed
    }

    /// Drop every entry of a class from both tiers. Returns the memory count.
    pub fn invalidate_class(&self, class: CacheClass) -> usize {
        let removed = lock_or_recover(&self.memory).remove_class(class);
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.delete_class(class) {
                warn!(target: "nixling::cache", class = class.as_str(), error = %e, "Disk cache delete failed");
            }
        }
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(class = class.as_str(), removed, "Cache class invalidated");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let (size, capacity, evictions) = {
            let memory = lock_or_recover(&self.memory);
            (memory.len(), memory.capacity(), memory.evictions())
        };
        let memory_hits = self.counters.memory_hits.load(Ordering::Relaxed);
        let disk_hits = self.counters.disk_hits.load(Ordering::Relaxed);
        let disk_entries = self.disk.as_ref().and_then(|disk| match disk.count() {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(target: "nixling::cache", error = %e, "Could not count disk entries");
                None
            }
        });

        CacheStats {
            hits: memory_hits + disk_hits,
            misses: self.counters.misses.load(Ordering::Relaxed),
            size,
            capacity,
            memory_hits,
            disk_hits,
            evictions,
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            disk_entries,
        }
    }

    /// Empty both tiers
    pub fn clear(&self) {
        lock_or_recover(&self.memory).clear();
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.clear() {
                warn!(target: "nixling::cache", error = %e, "Disk cache clear failed");
            }
        }
    }

    /// Wait for queued disk writes to land
    pub fn flush(&self) {
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.flush() {
                warn!(target: "nixling::cache", error = %e, "Disk cache flush failed");
            }
        }
    }

    /// Flush and stop the disk writer. Further writes stay memory-only.
    pub fn shutdown(&self) {
        if let Some(disk) = &self.disk {
            disk.shutdown();
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
