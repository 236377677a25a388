use std::collections::HashMap;
use std::time::{Duration, Instant};

/// In-memory cache of compiled schemas keyed by location, with TTL expiry.
///
/// A zero TTL disables caching: every lookup misses and nothing is stored.
pub struct SchemaCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V: Clone> SchemaCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Get a cached schema if it exists and hasn't expired.
    pub fn get(&self, location: &str) -> Option<V> {
        if let Some(entry) = self.entries.get(location) {
            if entry.inserted_at.elapsed() < self.ttl {
                metrics::counter!("chart.schema_cache.hit").increment(1);
                return Some(entry.value.clone());
            }
        }
        metrics::counter!("chart.schema_cache.miss").increment(1);
        None
    }

    /// Store a schema, evicting expired entries.
    pub fn insert(&mut self, location: String, value: V) {
        if self.ttl.is_zero() {
            return;
        }

        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);

        self.entries.insert(
            location,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://vega.github.io/schema/vega-lite/v5.json";

    #[test]
    fn test_cache_hit_miss() {
        let mut cache = SchemaCache::new(Duration::from_secs(3600));
        assert!(cache.get(URL).is_none());

        cache.insert(URL.into(), 7u32);
        assert_eq!(cache.get(URL), Some(7));
        assert!(cache.get("https://example.com/other.json").is_none());
    }

    #[test]
    fn test_cache_expiry() {
        let mut cache = SchemaCache::new(Duration::from_millis(1));
        cache.insert(URL.into(), "old".to_string());

        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get(URL).is_none());
    }

    #[test]
    fn test_zero_ttl_never_stores() {
        let mut cache = SchemaCache::new(Duration::ZERO);
        cache.insert(URL.into(), 1u8);
        assert!(cache.get(URL).is_none());
    }
}
