//! Small LRU cache over embedding calls, keyed by a hash of the input text —
//! the "embedding cache is a small LRU (≈50 entries, keyed by message hash)"
//! concurrency note. Concurrent readers are allowed and a set-on-miss race
//! is harmless (idempotent), so a single `parking_lot::Mutex` around the
//! whole cache is sufficient.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

pub struct EmbeddingCache {
    inner: Mutex<LruCache<u64, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.inner.lock().get(&hash_of(text)).cloned()
    }

    pub fn put(&self, text: &str, embedding: Vec<f32>) {
        self.inner.lock().put(hash_of(text), embedding);
    }
}

fn hash_of(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_a_put_value() {
        let cache = EmbeddingCache::new(10);
        cache.put("hello", vec![1.0, 2.0]);
        assert_eq!(cache.get("hello"), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn miss_returns_none() {
        let cache = EmbeddingCache::new(10);
        assert_eq!(cache.get("nothing here"), None);
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = EmbeddingCache::new(2);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        // Touch "a" so "b" becomes the least-recently-used entry.
        assert_eq!(cache.get("a"), Some(vec![1.0]));
        cache.put("c", vec![3.0]);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(vec![3.0]));
    }
}
