//! Plaintext access-token cache
//!
//! Ephemeral, LRU-bounded cache mapping connection IDs to currently-valid
//! plaintext access tokens. An entry's TTL never exceeds the token's real
//! remaining lifetime, so the cache can never serve a token past its expiry.
//! The cache is a pure optimization: every consumer falls back to a vault
//! decrypt on a miss.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use uuid::Uuid;

/// A cached plaintext token together with its issue metadata
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

struct CacheEntry {
    token: CachedToken,
    /// Eviction deadline: min(token expiry, insertion time + max TTL)
    valid_until: DateTime<Utc>,
}

/// LRU cache for decrypted access tokens
pub struct TokenCache {
    entries: Mutex<LruCache<Uuid, CacheEntry>>,
    max_ttl: Duration,
}

impl TokenCache {
    /// Create a cache holding at most `capacity` tokens, each for at most
    /// `max_ttl_seconds` (further bounded by the token's own expiry).
    pub fn new(capacity: usize, max_ttl_seconds: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_ttl: Duration::seconds(max_ttl_seconds as i64),
        }
    }

    /// Get the cached token for a connection, if present and still valid.
    /// Stale entries are evicted on the way out.
    pub fn get(&self, connection_id: &Uuid) -> Option<CachedToken> {
        let mut entries = self.entries.lock().expect("token cache lock poisoned");

        match entries.get(connection_id) {
            Some(entry) if entry.valid_until > Utc::now() => Some(entry.token.clone()),
            Some(_) => {
                entries.pop(connection_id);
                None
            }
            None => None,
        }
    }

    /// Cache a token for a connection. Invalidates any previous entry first;
    /// a token that has already expired is not cached at all.
    pub fn set(&self, connection_id: Uuid, token: CachedToken) {
        let now = Utc::now();
        if token.expires_at <= now {
            self.invalidate(&connection_id);
            return;
        }

        let valid_until = std::cmp::min(token.expires_at, now + self.max_ttl);

        let mut entries = self.entries.lock().expect("token cache lock poisoned");
        entries.pop(&connection_id);
        entries.put(connection_id, CacheEntry { token, valid_until });
    }

    /// Drop the cached token for a connection
    pub fn invalidate(&self, connection_id: &Uuid) {
        let mut entries = self.entries.lock().expect("token cache lock poisoned");
        entries.pop(connection_id);
    }

    /// Number of live entries (stale entries may still be counted until
    /// their next lookup)
    pub fn len(&self) -> usize {
        self.entries.lock().expect("token cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
