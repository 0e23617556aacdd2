//! # conduit-node
//!
//! Gateway node binary: loads settings, picks the cache backend, and starts
//! the WebSocket server plus the cache reconciliation task.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use conduit_auth::HttpAuthenticator;
use conduit_core::BrokerId;
use conduit_directory::{CacheStore, LocalDirectory, MemoryStore, RedisStore, SessionCache};
use conduit_server::{GatewayDeps, GatewayServer, ProcessorRegistry, ServerConfig};
use conduit_settings::{CacheBackend, CacheSettings, GatewaySettings, LogFormat};

/// Conduit gateway node.
#[derive(Parser, Debug)]
#[command(name = "conduit-node", about = "Conduit WebSocket gateway node")]
struct Cli {
    /// Settings file (defaults to `~/.conduit/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Broker id of this node (overrides settings).
    #[arg(long)]
    broker_id: Option<String>,

    /// Log level filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply(&self, settings: &mut GatewaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(id) = &self.broker_id {
            settings.node.broker_id = Some(id.clone());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Configured broker id, or a fresh one for this process.
fn resolve_broker_id(settings: &GatewaySettings) -> BrokerId {
    settings
        .node
        .broker_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map_or_else(BrokerId::generate, BrokerId::from)
}

async fn open_store(cache: &CacheSettings) -> Result<Arc<dyn CacheStore>> {
    match cache.backend {
        CacheBackend::Memory => {
            tracing::warn!("using in-memory session cache, sessions are not shared across nodes");
            Ok(Arc::new(MemoryStore::new()))
        }
        CacheBackend::Redis => {
            let store = RedisStore::connect(&cache.redis_url)
                .await
                .with_context(|| format!("Failed to connect to redis at {}", cache.redis_url))?;
            store.ping().await.context("Redis did not answer PING")?;
            tracing::info!(url = %cache.redis_url, "redis session cache connected");
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.config {
        Some(path) => conduit_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => conduit_settings::load_settings().context("Failed to load settings")?,
    };
    args.apply(&mut settings);

    match settings.logging.format {
        LogFormat::Compact => conduit_core::logging::init_subscriber(&settings.logging.level),
        LogFormat::Json => conduit_core::logging::init_json_subscriber(&settings.logging.level),
    }
    // Re-run now that warnings have somewhere to go.
    let _ = settings.validate();

    let broker_id = resolve_broker_id(&settings);
    tracing::info!(broker_id = %broker_id, "starting gateway node");

    let store = open_store(&settings.cache).await?;
    let cache = SessionCache::new(
        store,
        settings.cache.key_prefix.clone(),
        Duration::from_secs(settings.cache.entry_ttl_secs),
    );
    let authenticator = HttpAuthenticator::new(
        settings.auth.oauth_url.clone(),
        Duration::from_millis(settings.auth.request_timeout_ms),
    )
    .context("Failed to build identity service client")?;

    let metrics_handle =
        conduit_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let deps = GatewayDeps {
        authenticator: Arc::new(authenticator),
        directory: Arc::new(LocalDirectory::new(broker_id)),
        cache,
        processors: Arc::new(ProcessorRegistry::new()),
    };
    let server = GatewayServer::new(ServerConfig::from_settings(&settings), deps, metrics_handle);

    let (addr, server_handle) = server.listen().await.context("Failed to bind listener")?;
    let reconciler_handle = server.spawn_reconciler();
    tracing::info!(
        "gateway listening on ws://{addr}{} (identity service {})",
        server.config().ws_path,
        settings.auth.oauth_url
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let drained = server
        .shutdown()
        .graceful_shutdown(vec![server_handle, reconciler_handle], None)
        .await;

    tracing::info!(drained, "shutdown complete");
    Ok(())
}
