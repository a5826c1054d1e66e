//! Durable token persistence.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`PersistedTokenRecord`] - The latest known credential pair for one user
//! - [`TokenStore`] - Trait for persistence backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`JsonFileStore`] - Whole-file JSON implementation that survives restarts
//!
//! # Storage Key Convention
//!
//! Records are keyed by a stable user identity: the `sub` claim of the
//! presented secret, or a 16-character prefix of it when no claim is
//! available. See [`crate::claims::user_key`].
//!
//! # Example
//!
//! ```rust,ignore
//! use herald_core::store::{MemoryStore, PersistedTokenRecord, TokenStore};
//!
//! let store = MemoryStore::new();
//! let mut records = store.load().await?;
//! records.insert("user-1".into(), PersistedTokenRecord::new("rt", "at"));
//! store.save(&records).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use zeroize::Zeroize;

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed on drop.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for token store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error reading or writing the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Platform data directory not available.
    #[error("data directory not available")]
    DataDirUnavailable,
}

/// The latest known credential pair for one user.
///
/// Field names on disk match the cookie names the provider uses, so a
/// token file written by an earlier deployment stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTokenRecord {
    /// The most recently observed (possibly rotated) secret credential.
    #[serde(rename = "refreshToken")]
    pub secret: Secret,

    /// The session credential issued alongside it.
    #[serde(rename = "accessToken")]
    pub session: Secret,

    /// When this record was written.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl PersistedTokenRecord {
    /// Create a record stamped with the current time.
    pub fn new(secret: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            secret: Secret::new(secret),
            session: Secret::new(session),
            updated_at: Utc::now(),
        }
    }
}

/// All persisted records, keyed by user identity.
pub type TokenRecords = BTreeMap<String, PersistedTokenRecord>;

/// Abstraction over token persistence backends.
///
/// The whole mapping is read and written at once; there is no partial
/// update. Callers do a load-merge-save and the last writer wins.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read every persisted record.
    ///
    /// A store that has never been written returns an empty mapping.
    async fn load(&self) -> Result<TokenRecords, StoreError>;

    /// Replace the persisted mapping.
    async fn save(&self, records: &TokenRecords) -> Result<(), StoreError>;
}
