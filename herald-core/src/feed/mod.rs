//! Syndication feed fetching and caching.
//!
//! This module provides:
//! - [`FeedCache`] - TTL cache of parsed feeds that falls back to stale data
//! - [`FeedDocument`] / [`Episode`] - The normalized feed model
//! - [`FeedConfig`] - TTL, capacity, user agent and timeout
//!
//! # Staleness
//!
//! A cached document younger than the TTL is served without a request.
//! Once it is older, the feed is fetched again; if that fetch fails at the
//! network or HTTP level the old document is served instead. A body that
//! arrives but does not parse is an error.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

mod parse;

pub use parse::parse_feed;

/// Default time-to-live for a fetched feed.
const DEFAULT_TTL_SECS: u64 = 60 * 60;

/// Error type for feed operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid feed URL {url:?}: {message}")]
    InvalidUrl { url: String, message: String },

    /// Connection failure, timeout or unreadable body.
    #[error("failed to fetch feed {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("feed {url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("invalid feed document: {message}")]
    Parse { message: String },

    #[error("failed to build HTTP client: {message}")]
    Client { message: String },
}

/// Feed cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    /// Seconds a fetched feed is served without refetching.
    pub ttl_secs: u64,

    /// Maximum number of cached feeds (unbounded if unset).
    pub capacity: Option<usize>,

    /// `User-Agent` header for feed requests.
    pub user_agent: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            capacity: None,
            user_agent: concat!("herald/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 15,
        }
    }
}

/// A parsed and normalized feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedDocument {
    pub title: String,
    pub description: String,
    /// Channel artwork URL, empty if the feed has none.
    pub image: String,
    /// Episodes in document order.
    pub episodes: Vec<Episode>,
}

/// A feed item with a playable enclosure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub guid: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    /// Episode artwork without query string, falling back to the channel image.
    pub image: String,
    pub enclosure_url: String,
    pub enclosure_length: u64,
    pub enclosure_type: String,
    /// Human-readable duration, e.g. `"1h 2m"` or `"25m"`.
    pub runtime: Option<String>,
    pub link: String,
}

#[derive(Debug, Clone)]
struct FeedCacheEntry {
    document: Arc<FeedDocument>,
    fetched_at: Instant,
}

/// TTL cache of parsed feeds, keyed by URL.
pub struct FeedCache {
    http: reqwest::Client,
    ttl: Duration,
    capacity: Option<usize>,
    entries: RwLock<HashMap<String, FeedCacheEntry>>,
}

impl FeedCache {
    /// Create a cache from configuration.
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FeedError::Client {
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            ttl: Duration::from_secs(config.ttl_secs),
            capacity: config.capacity.map(|c| c.max(1)),
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Override the time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Get the feed at `url`, from cache when fresh.
    pub async fn fetch_feed(&self, url: &str) -> Result<Arc<FeedDocument>, FeedError> {
        let cached = self.entries.read().get(url).cloned();

        if let Some(entry) = &cached {
            if entry.fetched_at.elapsed() < self.ttl {
                tracing::debug!("Using cached feed");
                return Ok(entry.document.clone());
            }
        }

        let target = Url::parse(url).map_err(|e| FeedError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let host = target.host_str().unwrap_or_default().to_string();

        let body = match self.download(target).await {
            Ok(body) => body,
            Err(e) => {
                return match cached {
                    Some(entry) => {
                        tracing::warn!("Feed refresh from {} failed, serving stale copy: {}", host, e);
                        Ok(entry.document)
                    }
                    None => Err(e),
                };
            }
        };

        let document = Arc::new(parse_feed(&body)?);
        tracing::info!(
            "Fetched feed from {} with {} episode(s)",
            host,
            document.episodes.len()
        );

        self.insert(url, document.clone());
        Ok(document)
    }

    /// Drop the cached copy of a feed. Returns whether one was present.
    pub fn invalidate(&self, url: &str) -> bool {
        self.entries.write().remove(url).is_some()
    }

    /// Number of cached feeds.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no feeds are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    async fn download(&self, target: Url) -> Result<String, FeedError> {
        let url = target.to_string();

        let response = self
            .http
            .get(target)
            .send()
            .await
            .map_err(|e| FeedError::Fetch {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Http {
                url,
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FeedError::Fetch {
            url,
            message: e.to_string(),
        })
    }

    fn insert(&self, url: &str, document: Arc<FeedDocument>) {
        let mut entries = self.entries.write();

        if let Some(capacity) = self.capacity {
            if !entries.contains_key(url) && entries.len() >= capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.fetched_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            url.to_string(),
            FeedCacheEntry {
                document,
                fetched_at: Instant::now(),
            },
        );
    }
}
