mod config;
mod db;
mod errors;
mod models;
mod routes;
mod state;
mod wizard;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StorageBackend};
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;
use crate::wizard::recovery::{
    MemoryRecoveryCache, RecoveryBackups, RecoveryCache, RedisRecoveryCache,
};
use crate::wizard::registry::{SessionLimits, SessionRegistry};
use crate::wizard::session::WizardContext;
use crate::wizard::steps::{StepRegistry, WizardPaths};
use crate::wizard::store::{DraftStore, InMemoryDraftStore, PgDraftStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting résumé wizard v{}", env!("CARGO_PKG_VERSION"));

    let (store, cache) = build_storage(&config).await?;

    let registry = StepRegistry::default();
    info!("Step registry loaded with {} steps", registry.len());

    let ctx = WizardContext {
        registry,
        paths: WizardPaths::new(
            &config.wizard_root,
            &config.dashboard_path,
            &config.finalize_path,
        ),
        store: store.clone(),
        backups: RecoveryBackups::new(cache),
    };

    // Build app state
    let state = AppState {
        store,
        sessions: SessionRegistry::new(
            ctx,
            SessionLimits {
                idle_ttl: config.session_idle_ttl,
                capacity: config.max_live_sessions,
            },
        ),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict CORS to the web client's origin

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Connects the draft store and recovery cache for the configured backend.
async fn build_storage(
    config: &Config,
) -> Result<(Arc<dyn DraftStore>, Arc<dyn RecoveryCache>)> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let redis_url = config
                .redis_url
                .clone()
                .context("REDIS_URL is required for the postgres backend")?;

            let db = create_pool(database_url).await?;
            let redis = redis::Client::open(redis_url)?;
            let cache = RedisRecoveryCache::connect(&redis)
                .await
                .context("Failed to connect to Redis")?;

            Ok((Arc::new(PgDraftStore::new(db)), Arc::new(cache)))
        }
        StorageBackend::Memory => {
            info!("Using in-memory draft store and recovery cache; data will not survive restarts");
            Ok((
                Arc::new(InMemoryDraftStore::default()),
                Arc::new(MemoryRecoveryCache::default()),
            ))
        }
    }
}
