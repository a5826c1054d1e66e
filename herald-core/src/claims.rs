//! Unverified claim decoding for provider-issued tokens.
//!
//! Session and secret credentials are three-part dot-separated tokens whose
//! middle part is base64url-encoded JSON. Herald reads two claims from it:
//! `sub` (the user id) and `exp` (expiry, seconds since the epoch).
//!
//! # Trust boundary
//!
//! The signature is never checked. Herald does not hold the issuer's key,
//! and the decoded values are only used to pick cache keys and to decide
//! when to refresh. A token is only ever sent back to the provider that
//! issued it, which does its own verification. Nothing here may be used to
//! make a local authorization decision.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::TokenError;

/// Length of the secret prefix used as a user key when no `sub` claim exists.
const USER_KEY_FALLBACK_LEN: usize = 16;

/// Claims Herald reads from a token payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    #[serde(default)]
    pub sub: Option<String>,

    /// Expiry, seconds since the epoch.
    #[serde(default)]
    pub exp: Option<i64>,
}

impl Claims {
    /// Decode the payload of `token` without verifying it.
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| TokenError::InvalidClaims {
                message: "token has no payload segment".to_string(),
            })?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| TokenError::InvalidClaims {
                message: format!("payload is not base64url: {}", e),
            })?;

        serde_json::from_slice(&bytes).map_err(|e| TokenError::InvalidClaims {
            message: format!("payload is not a claims object: {}", e),
        })
    }

    /// The `exp` claim as a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// The `sub` claim, if present and non-empty.
    pub fn subject(&self) -> Option<&str> {
        self.sub.as_deref().filter(|s| !s.is_empty())
    }
}

/// Expiry of `token`, or `None` when it cannot be decoded or has no `exp`.
pub fn expiry_of(token: &str) -> Option<DateTime<Utc>> {
    Claims::decode(token).ok().and_then(|c| c.expires_at())
}

/// Subject of `token`, or `None` when it cannot be decoded or has no `sub`.
pub fn subject_of(token: &str) -> Option<String> {
    Claims::decode(token)
        .ok()
        .and_then(|c| c.subject().map(str::to_string))
}

/// Derive the persistence key for the user behind a secret.
///
/// The secret's `sub` claim, else a prefix of the secret. Only the secret
/// feeds the key, so loads and saves for the same presented secret always
/// agree.
pub fn user_key(secret: &str) -> String {
    subject_of(secret).unwrap_or_else(|| secret.chars().take(USER_KEY_FALLBACK_LEN).collect())
}
