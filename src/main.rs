use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use handlers::AppState;
use services::{content_store::ContentStore, quota::QuotaWorker, retention};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    // --- Logging setup (RUST_LOG wins over --debug) ---
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.default_log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting webshare with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    let root = &cfg.store.root;
    if !root.exists() {
        fs::create_dir_all(root)?;
        tracing::info!("Created storage directory at {}", root.display());
    }

    // --- Background workers ---
    let store_cfg = Arc::new(cfg.store.clone());
    let (quota, _quota_worker) = QuotaWorker::spawn(Arc::clone(&store_cfg));
    let _sweeper = retention::spawn_sweeper(Arc::clone(&store_cfg), cfg.sweep_interval, quota.clone());

    // --- Initialize core service ---
    let store = ContentStore::new(store_cfg, quota);
    let state = AppState::new(store, cfg.public_url.as_str());

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(
        "Server listening on http://{} (public URL {})",
        listener.local_addr()?,
        cfg.public_url
    );
    axum::serve(listener, app).await?;

    Ok(())
}
