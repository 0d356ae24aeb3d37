//! Process-local embedding cache keyed by a hash of the input text.
//!
//! Bounded by entry count; the least recently inserted or read entry is
//! evicted first. Nothing here is persisted.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::checksum::checksum;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub vector: Vec<f32>,
    /// Name of the tier that produced the vector.
    pub provider: String,
    pub inserted_at: i64,
}

pub struct EmbeddingCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn key_for(text: &str) -> String {
        checksum(text.as_bytes())
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn insert(&self, key: String, entry: CacheEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
