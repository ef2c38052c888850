//! Content-addressed dataset cache
//!
//! Datasets are keyed by the SHA-256 of the raw CSV bytes, so the same upload
//! or the same file read twice is parsed once. Population of a key happens
//! under the map's entry lock: at most one parse per key, and concurrent
//! callers asking for that key wait for it instead of parsing again.
//! Failed loads are not cached.
//!
//! The cache holds at most `capacity` datasets. Inserting past that drops the
//! least recently used ones; a dropped key answers `UnknownDataset` until the
//! CSV is loaded again.
//!
//! A cache belongs to one loader (one column schema). Callers serving several
//! schemas keep one cache per schema.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use pulse_core::{Dataset, PulseError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::loader::DatasetLoader;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetKey(String);

impl DatasetKey {
    /// Hex SHA-256 of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl From<&str> for DatasetKey {
    fn from(s: &str) -> Self {
        Self(s.to_ascii_lowercase())
    }
}

impl std::fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a cache lookup-or-load.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub key: DatasetKey,
    pub dataset: Arc<Dataset>,
    /// False when this call parsed the input.
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub const DEFAULT_CAPACITY: usize = 16;

struct Slot {
    dataset: Arc<Dataset>,
    last_used: AtomicU64,
}

pub struct DatasetCache {
    loader: DatasetLoader,
    capacity: usize,
    entries: DashMap<DatasetKey, Slot>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DatasetCache {
    pub fn new(loader: DatasetLoader) -> Self {
        Self::with_capacity(loader, DEFAULT_CAPACITY)
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(loader: DatasetLoader, capacity: usize) -> Self {
        Self {
            loader,
            capacity: capacity.max(1),
            entries: DashMap::new(),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn loader(&self) -> &DatasetLoader {
        &self.loader
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn touch(&self, slot: &Slot) -> Arc<Dataset> {
        slot.last_used.store(self.tick(), Ordering::Relaxed);
        Arc::clone(&slot.dataset)
    }

    pub fn load_bytes(&self, bytes: &[u8]) -> Result<Loaded, PulseError> {
        let key = DatasetKey::of(bytes);

        if let Some(existing) = self.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Dataset cache hit {}", key.short());
            return Ok(Loaded {
                dataset: self.touch(existing.value()),
                key,
                cached: true,
            });
        }

        let mut parsed = false;
        let dataset = {
            let entry = self
                .entries
                .entry(key.clone())
                .or_try_insert_with(|| {
                    parsed = true;
                    self.loader.load_bytes(bytes).map(|dataset| Slot {
                        dataset: Arc::new(dataset),
                        last_used: AtomicU64::new(0),
                    })
                })?;
            self.touch(entry.value())
        };

        if parsed {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Cached dataset {} ({} rows)", key.short(), dataset.len());
            self.evict_excess(&key);
        } else {
            // another caller populated the key while we waited on the entry
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        Ok(Loaded {
            key,
            dataset,
            cached: !parsed,
        })
    }

    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<Loaded, PulseError> {
        let bytes = std::fs::read(path.as_ref())?;
        self.load_bytes(&bytes)
    }

    /// Drops least recently used datasets until the cache fits its capacity.
    /// `keep` is the key just inserted and is never dropped.
    fn evict_excess(&self, keep: &DatasetKey) {
        let excess = self.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let mut candidates: Vec<(DatasetKey, u64)> = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .map(|entry| (entry.key().clone(), entry.value().last_used.load(Ordering::Relaxed)))
            .collect();
        candidates.sort_by_key(|(_, last_used)| *last_used);

        for (key, _) in candidates.into_iter().take(excess) {
            if self.entries.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Evicted dataset {} (capacity {})", key.short(), self.capacity);
            }
        }
    }

    pub fn get(&self, key: &DatasetKey) -> Option<Arc<Dataset>> {
        self.entries.get(key).map(|e| self.touch(e.value()))
    }

    /// Like [`get`](Self::get) but fails with `UnknownDataset`.
    pub fn require(&self, key: &str) -> Result<Arc<Dataset>, PulseError> {
        self.get(&DatasetKey::from(key))
            .ok_or_else(|| PulseError::UnknownDataset(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::ColumnSchema;

    const BODY: &str = "fecha_interaccion,id_sesion,canal\n2024-03-01 10:00:00,s1,web\n2024-03-02 11:00:00,s2,app\n";

    fn cache() -> DatasetCache {
        DatasetCache::new(DatasetLoader::new(ColumnSchema::default()))
    }

    #[test]
    fn test_second_load_is_cache_hit() {
        let cache = cache();
        let first = cache.load_bytes(BODY.as_bytes()).unwrap();
        let second = cache.load_bytes(BODY.as_bytes()).unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.key, second.key);
        assert!(Arc::ptr_eq(&first.dataset, &second.dataset));
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                capacity: DEFAULT_CAPACITY,
                hits: 1,
                misses: 1,
                evictions: 0
            }
        );
    }

    #[test]
    fn test_different_content_different_key() {
        let cache = cache();
        let a = cache.load_bytes(BODY.as_bytes()).unwrap();
        let other = BODY.replace("s2", "s3");
        let b = cache.load_bytes(other.as_bytes()).unwrap();
        assert_ne!(a.key, b.key);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_load_not_cached() {
        let cache = cache();
        let bad = "canal\nweb\n";
        assert!(cache.load_bytes(bad.as_bytes()).is_err());
        assert!(cache.is_empty());
        assert!(cache.load_bytes(bad.as_bytes()).is_err());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_require_unknown_key() {
        let cache = cache();
        let err = cache.require("deadbeef").unwrap_err();
        assert!(matches!(err, PulseError::UnknownDataset(_)));

        let loaded = cache.load_bytes(BODY.as_bytes()).unwrap();
        let found = cache.require(loaded.key.as_str()).unwrap();
        assert_eq!(found.len(), 2);
        // keys are case-insensitive hex
        assert!(cache.require(&loaded.key.as_str().to_uppercase()).is_ok());
    }

    #[test]
    fn test_path_and_bytes_share_key() {
        let cache = cache();
        let path = std::env::temp_dir().join(format!("pulse-cache-{}.csv", std::process::id()));
        std::fs::write(&path, BODY).unwrap();

        let from_path = cache.load_path(&path).unwrap();
        let from_bytes = cache.load_bytes(BODY.as_bytes()).unwrap();
        assert_eq!(from_path.key, from_bytes.key);
        assert!(from_bytes.cached);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_concurrent_loads_parse_once() {
        let cache = Arc::new(cache());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.load_bytes(BODY.as_bytes()).unwrap().key)
            })
            .collect();
        let keys: Vec<DatasetKey> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 7);
    }

    #[test]
    fn test_least_recently_used_dataset_evicted() {
        let cache = DatasetCache::with_capacity(DatasetLoader::new(ColumnSchema::default()), 2);
        let a = cache.load_bytes(BODY.as_bytes()).unwrap();
        let b = cache.load_bytes(BODY.replace("s2", "s3").as_bytes()).unwrap();
        // reading `a` makes `b` the oldest
        cache.require(a.key.as_str()).unwrap();
        let c = cache.load_bytes(BODY.replace("s2", "s4").as_bytes()).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.require(a.key.as_str()).is_ok());
        assert!(cache.require(c.key.as_str()).is_ok());
        let err = cache.require(b.key.as_str()).unwrap_err();
        assert!(matches!(err, PulseError::UnknownDataset(_)));
        assert_eq!(cache.stats().evictions, 1);

        // reloading the evicted CSV parses it again
        let again = cache.load_bytes(BODY.replace("s2", "s3").as_bytes()).unwrap();
        assert!(!again.cached);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let cache = DatasetCache::with_capacity(DatasetLoader::new(ColumnSchema::default()), 0);
        assert_eq!(cache.capacity(), 1);
        cache.load_bytes(BODY.as_bytes()).unwrap();
        let latest = cache.load_bytes(BODY.replace("s2", "s3").as_bytes()).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&latest.key).is_some());
    }

    #[test]
    fn test_key_is_sha256_hex() {
        let key = DatasetKey::of(b"abc");
        assert_eq!(
            key.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(key.short(), "ba7816bf8f01");
    }
}
