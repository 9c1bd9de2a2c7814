//! Response cache for GET requests (§4.4 step 3). Keyed by method, path,
//! query, and the policy's declared `vary_headers`; serves a fresh hit
//! without forwarding, serves a stale hit within the grace window while
//! kicking off a background refresh, and forwards on a clean miss.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

struct CacheEntry {
    response: CachedResponse,
    stored_at: Instant,
}

/// What the caller should do for a given cache key: nothing cached, a fresh
/// hit to serve as-is, or a stale hit to serve while a refresh runs
/// concurrently.
pub enum CacheLookup {
    Miss,
    Fresh(CachedResponse),
    Stale(CachedResponse),
}

pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Builds the cache key from the request's shape and the policy's
    /// declared vary headers (only those headers' values are mixed in, so
    /// two requests differing only in an un-varied header share an entry).
    pub fn build_key(
        method: &str,
        path: &str,
        query: &str,
        vary_headers: &[String],
        header_lookup: impl Fn(&str) -> Option<String>,
    ) -> String {
        let mut key = format!("{method}:{path}?{query}");
        for header in vary_headers {
            if let Some(value) = header_lookup(header) {
                key.push(':');
                key.push_str(header);
                key.push('=');
                key.push_str(&value);
            }
        }
        key
    }

    pub fn lookup(&self, key: &str, ttl: Duration, stale_grace: Duration) -> CacheLookup {
        let entries = self.entries.read().unwrap();
        let Some(entry) = entries.get(key) else {
            return CacheLookup::Miss;
        };
        let age = entry.stored_at.elapsed();
        if age <= ttl {
            CacheLookup::Fresh(entry.response.clone())
        } else if age <= ttl + stale_grace {
            CacheLookup::Stale(entry.response.clone())
        } else {
            CacheLookup::Miss
        }
    }

    /// Only 2xx responses are cacheable; callers should not call this for
    /// error responses.
    pub fn store(&self, key: String, response: CachedResponse) {
        self.entries.write().unwrap().insert(
            key,
            CacheEntry {
                response,
                stored_at: Instant::now(),
            },
        );
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> CachedResponse {
        CachedResponse {
            status,
            headers: vec![],
            body: b"hello".to_vec(),
        }
    }

    #[test]
    fn miss_on_empty_cache() {
        let cache = ResponseCache::new();
        assert!(matches!(
            cache.lookup("k", Duration::from_secs(30), Duration::from_secs(0)),
            CacheLookup::Miss
        ));
    }

    #[test]
    fn fresh_hit_within_ttl() {
        let cache = ResponseCache::new();
        cache.store("k".to_string(), response(200));
        assert!(matches!(
            cache.lookup("k", Duration::from_secs(30), Duration::from_secs(0)),
            CacheLookup::Fresh(_)
        ));
    }

    #[test]
    fn expired_beyond_grace_is_a_miss() {
        let cache = ResponseCache::new();
        cache.store("k".to_string(), response(200));
        assert!(matches!(
            cache.lookup("k", Duration::from_millis(0), Duration::from_millis(0)),
            CacheLookup::Miss
        ));
    }

    #[test]
    fn key_incorporates_vary_headers() {
        let headers = HashMap::from([("accept-language".to_string(), "en".to_string())]);
        let key = ResponseCache::build_key(
            "GET",
            "/api/users",
            "",
            &["accept-language".to_string()],
            |name| headers.get(name).cloned(),
        );
        assert!(key.contains("accept-language=en"));
    }
}
