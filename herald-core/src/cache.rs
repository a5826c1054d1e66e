//! In-memory session token cache.
//!
//! Maps the secret credential a caller presented to the session token most
//! recently issued for it, so repeated lookups skip the refresh endpoint.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::store::Secret;

/// A cached session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCacheEntry {
    /// The session token to send with API calls.
    pub session: Secret,

    /// The secret to refresh with next time (rotated if the provider rotated it).
    pub secret: Secret,

    /// When the session token expires (None if unknown).
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenCacheEntry {
    /// Create a new entry.
    pub fn new(
        session: impl Into<String>,
        secret: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            session: Secret::new(session),
            secret: Secret::new(secret),
            expires_at,
        }
    }

    /// Whether the session token stays valid for longer than `margin`.
    ///
    /// An entry without a known expiry is never considered fresh.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        self.expires_at
            .map(|exp| exp > Utc::now() + margin)
            .unwrap_or(false)
    }
}

/// Process-lifetime cache of session tokens, keyed by secret.
///
/// Unbounded unless built with [`TokenCache::with_capacity`]. When full,
/// inserting a new key evicts the entry that expires first.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<String, TokenCacheEntry>>,
    capacity: Option<usize>,
}

impl TokenCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Look up the entry for a secret.
    pub fn get(&self, secret: &str) -> Option<TokenCacheEntry> {
        self.entries.read().get(secret).cloned()
    }

    /// Insert or overwrite the entry for a secret.
    pub fn put(&self, secret: impl Into<String>, entry: TokenCacheEntry) {
        let secret = secret.into();
        let mut entries = self.entries.write();

        if let Some(capacity) = self.capacity {
            if !entries.contains_key(&secret) && entries.len() >= capacity {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at.unwrap_or(DateTime::<Utc>::MIN_UTC))
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(secret, entry);
    }

    /// Drop the entry for a secret. Returns whether one was present.
    pub fn invalidate(&self, secret: &str) -> bool {
        self.entries.write().remove(secret).is_some()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
