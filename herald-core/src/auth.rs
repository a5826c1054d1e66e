//! Session token lifecycle.
//!
//! This module provides [`AuthRefresher`], which turns a long-lived secret
//! into a currently valid session token. The states a secret moves through:
//!
//! 1. **Cached-Valid** - the [`TokenCache`] holds a token that outlives the
//!    safety margin; it is returned without a network call.
//! 2. **Cached-Expiring** - a cached token is close to (or past) expiry; the
//!    secret stored with it (possibly rotated) is used to refresh.
//! 3. **Cold** - nothing cached; the [`TokenStore`] record for the user is
//!    consulted. A still-valid persisted token is adopted as is, and a
//!    persisted rotated secret is preferred over the presented one.
//! 4. **Refreshing** - the rotation endpoint is called, and the new pair is
//!    written through to the cache and the store.
//! 5. **Invalid** - the rotation endpoint rejected the secret; nothing is
//!    cached or stored.
//!
//! Refreshes are single-flight per presented secret: concurrent callers wait
//! for the in-flight refresh and then read its result from the cache.

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use reqwest::header::SET_COOKIE;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::api::{ApiClient, SECRET_COOKIE, SESSION_COOKIE};
use crate::cache::{TokenCache, TokenCacheEntry};
use crate::claims::{expiry_of, user_key};
use crate::store::{PersistedTokenRecord, Secret, TokenRecords, TokenStore};

/// Default safety margin in seconds.
///
/// Tokens expiring within this window are refreshed before use.
const DEFAULT_SAFETY_MARGIN_SECS: i64 = 60;

/// Error type for session token operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No secret was supplied.
    #[error("no refresh token supplied")]
    MissingSecret,

    /// The rotation endpoint rejected the secret.
    #[error("token refresh failed: {message}")]
    RefreshFailed { status: Option<u16>, message: String },

    /// The rotation endpoint answered without a session token.
    #[error("token refresh failed: no {} cookie in the response", SESSION_COOKIE)]
    MissingSessionToken,

    /// Network error during token refresh.
    #[error("network error: {message}")]
    Network { message: String },

    /// A token's claims could not be decoded.
    #[error("invalid token claims: {message}")]
    InvalidClaims { message: String },
}

/// Source of valid session tokens.
///
/// [`AuthRefresher`] is the production implementation; resolvers depend on
/// this trait so tests can substitute their own.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Get a session token valid beyond the safety margin, refreshing if needed.
    ///
    /// `last_known` is a session token the caller already holds, if any; it
    /// is adopted on a cold start when it is still valid.
    async fn session_token(
        &self,
        secret: &str,
        last_known: Option<&str>,
    ) -> Result<Secret, TokenError>;

    /// Forget the cached session token for a secret.
    fn invalidate(&self, secret: &str);
}

/// Default implementation of [`SessionProvider`].
///
/// # Type Parameters
///
/// * `S` - The token store implementation to use
pub struct AuthRefresher<S: TokenStore> {
    api: Arc<ApiClient>,
    cache: Arc<TokenCache>,
    store: S,
    margin: Duration,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: TokenStore> AuthRefresher<S> {
    /// Create a refresher with the default 60 second safety margin.
    pub fn new(api: Arc<ApiClient>, cache: Arc<TokenCache>, store: S) -> Self {
        Self {
            api,
            cache,
            store,
            margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Override the safety margin.
    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// The session token cache.
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// The durable token store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a currently valid session token for `secret`.
    pub async fn get_valid_session_token(
        &self,
        secret: &str,
        last_known: Option<&str>,
    ) -> Result<Secret, TokenError> {
        let presented = secret.trim();
        if presented.is_empty() {
            return Err(TokenError::MissingSecret);
        }

        if let Some(entry) = self.fresh_entry(presented) {
            tracing::debug!("Using cached session token");
            return Ok(entry.session);
        }

        let lock = self.refresh_lock(presented);
        let result = {
            let _guard = lock.lock().await;
            self.resolve_locked(presented, last_known).await
        };
        drop(lock);
        self.release_refresh_lock(presented);

        result
    }

    fn fresh_entry(&self, presented: &str) -> Option<TokenCacheEntry> {
        self.cache
            .get(presented)
            .filter(|entry| entry.is_fresh(self.margin))
    }

    fn refresh_lock(&self, presented: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .lock()
            .entry(presented.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_refresh_lock(&self, presented: &str) {
        let mut locks = self.refresh_locks.lock();
        if locks
            .get(presented)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(presented);
        }
    }

    /// Resolve a token while holding the per-secret refresh lock.
    async fn resolve_locked(
        &self,
        presented: &str,
        last_known: Option<&str>,
    ) -> Result<Secret, TokenError> {
        // Another caller may have finished a refresh while we waited.
        if let Some(entry) = self.cache.get(presented) {
            if entry.is_fresh(self.margin) {
                tracing::debug!("Using session token refreshed by a concurrent caller");
                return Ok(entry.session);
            }

            tracing::info!("Session token expiring, refreshing");
            let rotated = entry.secret.expose().to_string();
            return self.refresh(presented, &rotated).await;
        }

        let records = self.load_records().await;
        let persisted = records.get(&user_key(presented));

        let rotated = persisted
            .map(|record| record.secret.expose().trim())
            .filter(|s| !s.is_empty() && *s != presented);
        let chosen = match rotated {
            Some(rotated) => {
                tracing::info!("Using persisted rotated refresh token");
                rotated.to_string()
            }
            None => presented.to_string(),
        };

        let candidate = persisted
            .map(|record| record.session.expose().trim())
            .filter(|s| !s.is_empty())
            .or_else(|| last_known.map(str::trim).filter(|s| !s.is_empty()));

        if let Some(candidate) = candidate {
            let entry = TokenCacheEntry::new(candidate, chosen.as_str(), expiry_of(candidate));
            if entry.is_fresh(self.margin) {
                tracing::debug!("Adopting still-valid session token without refresh");
                self.cache.put(presented, entry.clone());
                return Ok(entry.session);
            }
        }

        self.refresh(presented, &chosen).await
    }

    /// Call the rotation endpoint with `chosen` and write the result through.
    async fn refresh(&self, presented: &str, chosen: &str) -> Result<Secret, TokenError> {
        tracing::info!("Refreshing session token");

        let response = self
            .api
            .refresh_request(chosen)
            .send()
            .await
            .map_err(|e| TokenError::Network {
                message: format!("refresh request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("Token refresh rejected with HTTP {}", status);
            return Err(TokenError::RefreshFailed {
                status: Some(status.as_u16()),
                message: format!("refresh endpoint returned {}", status),
            });
        }

        let set_cookie: Vec<&str> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();

        let session = find_cookie(&set_cookie, SESSION_COOKIE).ok_or_else(|| {
            tracing::error!(
                "Refresh response carried {} Set-Cookie header(s) but no session token",
                set_cookie.len()
            );
            TokenError::MissingSessionToken
        })?;
        let latest = find_cookie(&set_cookie, SECRET_COOKIE).unwrap_or_else(|| chosen.to_string());

        let expires_at = expiry_of(&session);
        let entry = TokenCacheEntry::new(session.as_str(), latest.as_str(), expires_at);

        let keys: BTreeSet<&str> = [presented, chosen, latest.as_str()]
            .into_iter()
            .filter(|k| !k.is_empty())
            .collect();
        for key in keys {
            self.cache.put(key, entry.clone());
        }

        let mut records = self.load_records().await;
        records.insert(
            user_key(presented),
            PersistedTokenRecord::new(latest.as_str(), session.as_str()),
        );
        self.save_records(&records).await;

        match expires_at {
            Some(exp) => tracing::info!("Session token refreshed, valid until {}", exp.to_rfc3339()),
            None => tracing::info!("Session token refreshed, expiry unknown"),
        }

        Ok(Secret::new(session))
    }

    /// Load persisted records, treating any failure as an empty store.
    async fn load_records(&self) -> TokenRecords {
        self.store.load().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to load persisted tokens: {}", e);
            TokenRecords::new()
        })
    }

    /// Save persisted records; failures are logged and swallowed.
    async fn save_records(&self, records: &TokenRecords) {
        if let Err(e) = self.store.save(records).await {
            tracing::warn!("Failed to persist tokens: {}", e);
        }
    }
}

#[async_trait]
impl<S: TokenStore + 'static> SessionProvider for AuthRefresher<S> {
    async fn session_token(
        &self,
        secret: &str,
        last_known: Option<&str>,
    ) -> Result<Secret, TokenError> {
        self.get_valid_session_token(secret, last_known).await
    }

    fn invalidate(&self, secret: &str) {
        if self.cache.invalidate(secret.trim()) {
            tracing::debug!("Invalidated cached session token");
        }
    }
}

/// Find a cookie value in `Set-Cookie` header lines.
///
/// Matches `name=value` at the start of a line or right after a comma (some
/// servers fold several cookies into one line). The value ends at `;`, `,`
/// or whitespace.
pub(crate) fn find_cookie(lines: &[&str], name: &str) -> Option<String> {
    lines.iter().find_map(|line| {
        line.split(',').find_map(|segment| {
            let value = segment.trim_start().strip_prefix(name)?.strip_prefix('=')?;
            let end = value
                .find(|c: char| c == ';' || c == ',' || c.is_whitespace())
                .unwrap_or(value.len());
            let value = &value[..end];
            (!value.is_empty()).then(|| value.to_string())
        })
    })
}
