//! CLI configuration handling.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use herald_core::{ApiConfig, FeedConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`HeraldConfig::secret`].
pub const SECRET_ENV: &str = "HERALD_SECRET";

/// Environment variable overriding [`HeraldConfig::feed_url`].
pub const FEED_URL_ENV: &str = "HERALD_FEED_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    /// Logging level when `RUST_LOG` is unset.
    pub log_level: String,

    /// Long-lived refresh token for the provider.
    pub secret: Option<String>,

    /// Default feed for the `feed` command.
    pub feed_url: Option<String>,

    pub api: ApiConfig,

    pub feed: FeedConfig,

    pub storage: StorageConfig,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Token file location; the platform data directory if unset.
    pub token_file: Option<PathBuf>,
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            secret: None,
            feed_url: None,
            api: ApiConfig::default(),
            feed: FeedConfig::default(),
            storage: StorageConfig::default(),
            config_path: None,
        }
    }
}

/// Load configuration from `path`, or from the default location.
///
/// An explicitly given file must exist; a missing default file yields the
/// defaults. Environment overrides are applied last.
pub fn load_config(path: Option<&Path>) -> Result<HeraldConfig> {
    let (config_path, required) = match path {
        Some(path) => (Some(path.to_path_buf()), true),
        None => (default_config_path(), false),
    };

    let mut config = match &config_path {
        Some(path) if required || path.exists() => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let mut config: HeraldConfig = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            config.config_path = Some(path.clone());
            config
        }
        _ => HeraldConfig::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Apply environment overrides looked up through `lookup`.
fn apply_overrides(config: &mut HeraldConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(secret) = non_empty(SECRET_ENV) {
        config.secret = Some(secret);
    }
    if let Some(feed_url) = non_empty(FEED_URL_ENV) {
        config.feed_url = Some(feed_url);
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "raibid-labs", "herald").map(|d| d.config_dir().join("herald.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("herald.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"
feed_url = "https://example.com/feed.xml"

[api]
timeout_secs = 5

[feed]
ttl_secs = 60

[storage]
token_file = "/tmp/herald-tokens.json"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.api.timeout_secs, 5);
        assert_eq!(config.api.graphql_url, ApiConfig::default().graphql_url);
        assert_eq!(config.feed.ttl_secs, 60);
        assert_eq!(
            config.storage.token_file.as_deref(),
            Some(Path::new("/tmp/herald-tokens.json"))
        );
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("herald.toml");
        std::fs::write(&path, "").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.feed, FeedConfig::default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load_config(Some(&temp_dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HeraldConfig {
            secret: Some("from-file".to_string()),
            ..HeraldConfig::default()
        };

        apply_overrides(&mut config, |key| match key {
            SECRET_ENV => Some("from-env".to_string()),
            FEED_URL_ENV => Some("  ".to_string()),
            _ => None,
        });

        assert_eq!(config.secret.as_deref(), Some("from-env"));
        assert!(config.feed_url.is_none());
    }
}
