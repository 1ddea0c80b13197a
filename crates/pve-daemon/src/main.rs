//! pve-daemon entry point.
//!
//! Loads config, picks the store, recovers engine state, starts the closing
//! sweep and serves HTTP. Route handlers live in `routes.rs`; shared state in
//! `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use pve_config::{
    report_unused_keys, secrets::resolve_secrets, ConfigMode, LoadedConfig, PatrolConfig,
    UnusedKeyPolicy,
};
use pve_daemon::{routes, state};
use pve_db::{MemoryStore, PatrolStore, PgStore};
use pve_reconcile::Schedule;
use pve_runtime::{spawn_sweep, PatrolService, RuntimeSettings, SystemClock};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if .env.local does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config()?;
    let cfg = match &loaded {
        Some(l) => l.patrol()?,
        None => PatrolConfig::default(),
    };
    let schedule = Schedule::from_config(&cfg)?;

    let secrets = resolve_secrets(
        &loaded
            .as_ref()
            .map(|l| l.config_json.clone())
            .unwrap_or_else(|| serde_json::json!({})),
    );
    let (store, store_kind): (Arc<dyn PatrolStore>, &'static str) = match &secrets.database_url {
        Some(url) => {
            let pool = pve_db::connect(url).await?;
            pve_db::migrate(&pool).await?;
            (Arc::new(PgStore::new(pool)), "postgres")
        }
        None => {
            warn!(
                env = %secrets.database_url_env,
                "database url not set; using the in-memory store (state is lost on exit)"
            );
            (Arc::new(MemoryStore::new()), "memory")
        }
    };

    let service = Arc::new(PatrolService::new(
        schedule,
        RuntimeSettings::from_config(&cfg),
        store,
        Arc::new(SystemClock),
    ));
    service.recover().await.context("state recovery failed")?;

    let mut app_state = state::AppState::new(Arc::clone(&service)).with_store_kind(store_kind);
    if let Some(l) = &loaded {
        app_state = app_state.with_config_hash(l.config_hash.clone());
    }
    let shared = Arc::new(app_state);

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    let cancel = CancellationToken::new();
    let sweep = spawn_sweep(
        Arc::clone(&service),
        Duration::from_secs(cfg.sweep.interval_secs),
        cancel.clone(),
    );

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("pve-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("server crashed")?;

    cancel.cancel();
    let _ = sweep.await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Layers from `PVE_CONFIG` (comma-separated, base first). Unset means
/// built-in defaults.
fn load_config() -> anyhow::Result<Option<LoadedConfig>> {
    let Ok(raw) = std::env::var("PVE_CONFIG") else {
        return Ok(None);
    };
    let paths: Vec<&str> = raw.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    if paths.is_empty() {
        return Ok(None);
    }
    let loaded = pve_config::load_layered_yaml(&paths)?;
    let report = report_unused_keys(ConfigMode::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    for ptr in &report.unused_leaf_pointers {
        warn!(pointer = %ptr, "config key is not used by the daemon");
    }
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");
    Ok(Some(loaded))
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("PVE_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
        _ = cancel.cancelled() => {}
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
