use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Thread-safe LRU cache
pub struct SharedLruCache<K, V> {
    cache: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> SharedLruCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Create a new LRU cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let non_zero_capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(non_zero_capacity))),
        }
    }

    /// Insert a value into the cache
    pub fn insert(&self, key: K, value: V) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, value);
        }
    }

    /// Get a value from the cache
    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().map(|c| c.cap().get()).unwrap_or(0)
    }

    /// Clear all entries from the cache
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

/// Memo of token counts keyed by rendered text
pub struct TokenCountCache {
    cache: SharedLruCache<String, usize>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl TokenCountCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: SharedLruCache::new(capacity),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    /// Get a count from cache
    pub fn get_count(&self, text: &str) -> Option<usize> {
        match self.cache.get(&text.to_string()) {
            Some(count) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(count)
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a count in cache
    pub fn store_count(&self, text: &str, count: usize) {
        self.cache.insert(text.to_string(), count);
    }

    /// Get cache statistics with hit ratio
    pub fn stats(&self) -> CacheStats {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = self.miss_count.load(Ordering::Relaxed);

        CacheStats {
            capacity: self.cache.capacity(),
            size: self.cache.len(),
            hits,
            misses,
            hit_ratio: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            } else {
                0.0
            },
        }
    }

    /// Clear cache and reset statistics
    pub fn clear(&self) {
        self.cache.clear();
        self.hit_count.store(0, Ordering::Relaxed);
        self.miss_count.store(0, Ordering::Relaxed);
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub capacity: usize,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_lru_cache() {
        let cache = SharedLruCache::new(3);

        cache.insert("key1", "value1");
        cache.insert("key2", "value2");
        cache.insert("key3", "value3");

        assert_eq!(cache.get(&"key1"), Some("value1"));
        assert_eq!(cache.get(&"key2"), Some("value2"));
        assert_eq!(cache.get(&"key3"), Some("value3"));

        // Insert one more (should evict LRU)
        cache.insert("key4", "value4");
        assert_eq!(cache.get(&"key1"), None);
        assert_eq!(cache.get(&"key4"), Some("value4"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_token_count_cache() {
        let cache = TokenCountCache::new(100);
        cache.store_count("1. e4 e5", 4);

        assert_eq!(cache.get_count("1. e4 e5"), Some(4));
        assert_eq!(cache.get_count("1. e4 e5"), Some(4));
        assert_eq!(cache.get_count("1. d4"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 2.0 / 3.0);

        cache.clear();
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: SharedLruCache<u32, u32> = SharedLruCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }
}
