// src/main.rs
use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum_server::Handle;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use poll_service::{cache::ResultCache, db, store::PollStore, AppState, Config};

#[derive(Parser)]
#[command(name = "poll-service", version, about = "Online poll API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Recount votes and repair drifted option counters
    Recount {
        /// Only this poll
        #[arg(long)]
        poll_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // Load environment variables from .env file

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("poll_service=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    let pool = db::create_pool(&config)
        .await
        .context("failed to open the database")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await,
        Command::Recount { poll_id } => {
            let drifts = PollStore::new(pool)
                .reconcile_vote_counts(poll_id)
                .await
                .context("recount failed")?;
            info!(repaired = drifts.len(), "recount finished");
            Ok(())
        }
    }
}

async fn serve(config: Config, pool: sqlx::SqlitePool) -> anyhow::Result<()> {
    let cache = results_cache(&config).await?;

    let address: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    let app = poll_service::create_routes(AppState::new(config, pool, cache));

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!("Server running on {address}");
    axum_server::bind(address)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}

#[cfg(feature = "redis")]
async fn results_cache(config: &Config) -> anyhow::Result<Arc<dyn ResultCache>> {
    if let Some(url) = &config.redis_url {
        let cache = poll_service::cache::RedisCache::connect(url)
            .await
            .context("failed to connect to Redis")?;
        info!("Caching results in Redis");
        return Ok(Arc::new(cache));
    }
    Ok(in_memory_cache(config))
}

#[cfg(not(feature = "redis"))]
async fn results_cache(config: &Config) -> anyhow::Result<Arc<dyn ResultCache>> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; caching in memory");
    }
    Ok(in_memory_cache(config))
}

fn in_memory_cache(config: &Config) -> Arc<dyn ResultCache> {
    let cache = poll_service::cache::InMemoryCache::new();
    cache.start_purging(config.results_cache_ttl.max(Duration::from_secs(1)) * 12);
    Arc::new(cache)
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
