use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Tokens are reused for this long regardless of what the authority declares.
pub const TOKEN_TTL: Duration = Duration::from_secs(10 * 60);
/// Maximum number of distinct scopes kept at once.
pub const TOKEN_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct BearerToken {
    pub scope: String,
    pub value: String,
    pub expires_at: Instant,
}

/// Bounded per-scope bearer token cache.
///
/// Entries expire after a fixed TTL. When a new scope would exceed the
/// capacity, the scope inserted earliest is evicted. Lookups use `peek`, so
/// only inserts move a scope in the eviction order.
pub struct TokenCache {
    ttl: Duration,
    tokens: LruCache<String, BearerToken>,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(TOKEN_TTL, TOKEN_CAPACITY)
    }
}

impl TokenCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            tokens: LruCache::new(capacity),
        }
    }

    /// Return the cached token value for `scope` if it is still fresh at `now`
    pub fn get(&self, scope: &str, now: Instant) -> Option<&str> {
        self.tokens
            .peek(scope)
            .filter(|t| now < t.expires_at)
            .map(|t| t.value.as_str())
    }

    /// Store a freshly issued token, replacing any previous one for the scope
    pub fn insert(&mut self, scope: &str, value: String, now: Instant) {
        let token = BearerToken {
            scope: scope.to_string(),
            value,
            expires_at: now + self.ttl,
        };
        self.tokens.put(scope.to_string(), token);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_is_returned() {
        let now = Instant::now();
        let mut cache = TokenCache::default();
        cache.insert("repository:app", "abc".to_string(), now);
        assert_eq!(cache.get("repository:app", now), Some("abc"));
        assert_eq!(
            cache.get("repository:app", now + Duration::from_secs(599)),
            Some("abc")
        );
    }

    #[test]
    fn test_token_expires_after_ttl() {
        let now = Instant::now();
        let mut cache = TokenCache::default();
        cache.insert("registry:catalog", "abc".to_string(), now);
        assert_eq!(cache.get("registry:catalog", now + TOKEN_TTL), None);
    }

    #[test]
    fn test_scopes_are_independent() {
        let now = Instant::now();
        let mut cache = TokenCache::default();
        cache.insert("repository:a", "token-a".to_string(), now);
        assert_eq!(cache.get("repository:b", now), None);
        assert_eq!(cache.get("repository:a", now), Some("token-a"));
    }

    #[test]
    fn test_refresh_replaces_value() {
        let now = Instant::now();
        let mut cache = TokenCache::default();
        cache.insert("repository:a", "old".to_string(), now);
        let later = now + TOKEN_TTL + Duration::from_secs(1);
        cache.insert("repository:a", "new".to_string(), later);
        assert_eq!(cache.get("repository:a", later), Some("new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_oldest_scope_is_evicted_at_capacity() {
        let now = Instant::now();
        let mut cache = TokenCache::new(TOKEN_TTL, 3);
        for name in ["a", "b", "c", "d"] {
            cache.insert(&format!("repository:{name}"), name.to_string(), now);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("repository:a", now), None);
        assert_eq!(cache.get("repository:d", now), Some("d"));
    }

    #[test]
    fn test_default_capacity_holds_one_hundred_scopes() {
        let now = Instant::now();
        let mut cache = TokenCache::default();
        for i in 0..=TOKEN_CAPACITY {
            cache.insert(&format!("repository:r{i}"), i.to_string(), now);
        }
        assert_eq!(cache.len(), TOKEN_CAPACITY);
        assert_eq!(cache.get("repository:r0", now), None);
        assert_eq!(cache.get("repository:r1", now), Some("1"));
    }

    #[test]
    fn test_reads_do_not_change_eviction_order() {
        let now = Instant::now();
        let mut cache = TokenCache::new(TOKEN_TTL, 3);
        for name in ["a", "b", "c"] {
            cache.insert(&format!("repository:{name}"), name.to_string(), now);
        }
        assert_eq!(cache.get("repository:a", now), Some("a"));
        cache.insert("repository:d", "d".to_string(), now);
        assert_eq!(cache.get("repository:a", now), None);
        assert_eq!(cache.get("repository:b", now), Some("b"));
    }

    #[test]
    fn test_refresh_counts_as_new_insertion() {
        let now = Instant::now();
        let mut cache = TokenCache::new(TOKEN_TTL, 3);
        for name in ["a", "b", "c"] {
            cache.insert(&format!("repository:{name}"), name.to_string(), now);
        }
        cache.insert("repository:a", "a2".to_string(), now);
        cache.insert("repository:d", "d".to_string(), now);
        assert_eq!(cache.get("repository:a", now), Some("a2"));
        assert_eq!(cache.get("repository:b", now), None);
    }
}
