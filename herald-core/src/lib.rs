//! # Herald Core
//!
//! Core library for Herald, a bridge between a media-catalog client and a
//! subscription video/audio platform.
//!
//! This crate provides:
//! - Session lifecycle: rotating a long-lived secret into short-lived session
//!   tokens, with an in-memory [`TokenCache`] and a durable [`TokenStore`]
//! - Content resolution: turning a content id into playable [`Asset`]s
//! - Subscription listing for the signed-in user
//! - A TTL [`FeedCache`] for RSS feeds with stale-on-error fallback
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use herald_core::{ApiClient, ApiConfig, AuthRefresher, ContentResolver, MemoryStore, TokenCache};
//!
//! async fn streams(content_id: &str, secret: &str) -> Result<(), herald_core::HeraldError> {
//!     let api = Arc::new(ApiClient::new(ApiConfig::default())?);
//!     let refresher = Arc::new(AuthRefresher::new(
//!         api.clone(),
//!         Arc::new(TokenCache::new()),
//!         MemoryStore::new(),
//!     ));
//!     let resolver = ContentResolver::new(api, refresher);
//!     for asset in resolver.resolve_assets(content_id, secret).await? {
//!         println!("{:?}", asset.video_stream_url);
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod claims;
pub mod content;
pub mod error;
pub mod feed;
pub mod store;
pub mod subscriptions;

// Re-export commonly used types at crate root
pub use api::{ApiClient, ApiConfig, ContentError};

pub use auth::{AuthRefresher, SessionProvider, TokenError};

pub use cache::{TokenCache, TokenCacheEntry};

pub use claims::Claims;

pub use content::{Asset, ContentResolver};

pub use error::HeraldError;

pub use feed::{Episode, FeedCache, FeedConfig, FeedDocument, FeedError};

pub use store::{
    JsonFileStore,
    MemoryStore,
    PersistedTokenRecord,
    Secret,
    StoreError,
    TokenRecords,
    TokenStore,
};

pub use subscriptions::{Subscription, SubscriptionResolver};
