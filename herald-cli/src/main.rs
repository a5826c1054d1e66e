//! Herald CLI
//!
//! Command-line front end for resolving media, listing subscriptions and
//! reading feeds.
//!
//! # Usage
//!
//! ```bash
//! # Episodes of the configured feed
//! herald feed
//!
//! # Playable assets of one post
//! HERALD_SECRET=... herald assets <POST_ID> --format json
//!
//! # Active subscriptions
//! herald subscriptions
//!
//! # Check that the stored refresh token still works
//! herald session
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use herald_core::claims::{expiry_of, subject_of};
use herald_core::{
    ApiClient, AuthRefresher, ContentResolver, FeedCache, JsonFileStore, SubscriptionResolver,
    TokenCache,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

mod config;

use config::HeraldConfig;

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Bridge between a media catalog and a subscription platform")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print a feed
    Feed {
        /// Feed URL (defaults to feed_url from the config)
        url: Option<String>,
    },

    /// Resolve the playable assets of a post
    Assets {
        /// Post identifier
        content_id: String,
    },

    /// List active subscriptions
    Subscriptions,

    /// Obtain a session token and report its validity
    Session,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&config.log_level, cli.verbose);

    if let Some(path) = &config.config_path {
        info!("Loaded configuration from {:?}", path);
    }

    match cli.command {
        Commands::Feed { url } => show_feed(&config, url, cli.format).await,
        Commands::Assets { content_id } => show_assets(&config, &content_id, cli.format).await,
        Commands::Subscriptions => show_subscriptions(&config, cli.format).await,
        Commands::Session => show_session(&config, cli.format).await,
    }
}

/// Log to stderr so structured output on stdout stays clean.
fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct Services {
    api: Arc<ApiClient>,
    refresher: Arc<AuthRefresher<JsonFileStore>>,
    secret: String,
}

impl Services {
    fn from_config(config: &HeraldConfig) -> Result<Self> {
        let secret = config.secret.clone().with_context(|| {
            format!(
                "No refresh token configured; set `secret` in herald.toml or {}",
                config::SECRET_ENV
            )
        })?;

        let store = match &config.storage.token_file {
            Some(path) => JsonFileStore::new(path),
            None => JsonFileStore::at_default_path().context("Failed to locate token file")?,
        };
        info!("Using token file {:?}", store.path());

        let api = Arc::new(ApiClient::new(config.api.clone())?);
        let refresher = Arc::new(AuthRefresher::new(
            api.clone(),
            Arc::new(TokenCache::new()),
            store,
        ));

        Ok(Self {
            api,
            refresher,
            secret,
        })
    }
}

async fn show_feed(config: &HeraldConfig, url: Option<String>, format: OutputFormat) -> Result<()> {
    let url = url.or_else(|| config.feed_url.clone()).with_context(|| {
        format!(
            "No feed URL given; pass one or set `feed_url` in herald.toml or {}",
            config::FEED_URL_ENV
        )
    })?;

    let cache = FeedCache::new(&config.feed)?;
    let feed = cache.fetch_feed(&url).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*feed)?),
        OutputFormat::Text => {
            println!("{}", feed.title);
            if !feed.description.is_empty() {
                println!("{}", feed.description);
            }
            println!();
            for episode in &feed.episodes {
                let runtime = episode
                    .runtime
                    .as_deref()
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default();
                println!(
                    "{}  {}{}",
                    episode.published_at.format("%Y-%m-%d"),
                    episode.title,
                    runtime
                );
                println!("    {}", episode.enclosure_url);
            }
        }
    }
    Ok(())
}

async fn show_assets(config: &HeraldConfig, content_id: &str, format: OutputFormat) -> Result<()> {
    let services = Services::from_config(config)?;
    let resolver = ContentResolver::new(services.api.clone(), services.refresher.clone());

    let assets = resolver
        .resolve_assets(content_id, &services.secret)
        .await
        .with_context(|| format!("Failed to resolve assets for {}", content_id))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&assets)?),
        OutputFormat::Text => {
            if assets.is_empty() {
                println!("No playable assets for {}", content_id);
            }
            for asset in &assets {
                println!("{}{}", asset.id, if asset.has_video { " (video)" } else { "" });
                let urls = [
                    ("video stream", &asset.video_stream_url),
                    ("audio stream", &asset.audio_stream_url),
                    ("audio file", &asset.audio_static_url),
                    ("thumbnail", &asset.thumbnail_url),
                ];
                for (label, url) in urls {
                    if let Some(url) = url {
                        println!("  {:<12} {}", label, url);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn show_subscriptions(config: &HeraldConfig, format: OutputFormat) -> Result<()> {
    let services = Services::from_config(config)?;
    let resolver = SubscriptionResolver::new(services.api.clone(), services.refresher.clone());

    let subscriptions = resolver
        .list_subscriptions(&services.secret)
        .await
        .context("Failed to list subscriptions")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&subscriptions)?),
        OutputFormat::Text => {
            println!("Active subscriptions:");
            if subscriptions.is_empty() {
                println!("  (none)");
            }
            for sub in &subscriptions {
                println!("  {} ({})", sub.name, sub.slug);
            }
        }
    }
    Ok(())
}

async fn show_session(config: &HeraldConfig, format: OutputFormat) -> Result<()> {
    let services = Services::from_config(config)?;

    let session = services
        .refresher
        .get_valid_session_token(&services.secret, None)
        .await
        .context("Failed to obtain a session token")?;

    let subject = subject_of(session.expose());
    let expires_at = expiry_of(session.expose());

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "valid": true,
                "subject": subject,
                "expires_at": expires_at.map(|t| t.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Session token is valid");
            if let Some(subject) = subject {
                println!("  User:    {}", subject);
            }
            match expires_at {
                Some(exp) => println!("  Expires: {}", exp.to_rfc3339()),
                None => println!("  Expires: unknown"),
            }
        }
    }
    Ok(())
}
