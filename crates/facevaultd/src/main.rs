use std::sync::Arc;

use anyhow::{Context, Result};
use facevault_core::OnnxProvider;
use facevault_store::FaceStore;
use tracing_subscriber::EnvFilter;

mod api;
mod bootstrap;
mod config;
mod engine;
mod gallery;
mod service;
#[cfg(test)]
mod testing;
mod validate;

use config::Config;
use service::FaceService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        bind = %config.bind,
        db = %config.db_path.display(),
        models = %config.model_dir.display(),
        tolerance = config.tolerance,
        "facevaultd starting"
    );

    let store = FaceStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open face store at {}", config.db_path.display()))?;

    let provider = OnnxProvider::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    let engine = engine::spawn_engine(provider, config.max_image_dim)?;

    let service = Arc::new(FaceService::new(store, engine, config.tolerance));

    if let Some(dir) = &config.reference_dir {
        bootstrap::enroll_directory(&service, dir)
            .await
            .with_context(|| format!("failed to scan reference directory {}", dir.display()))?;
    }

    let app = api::router(Arc::clone(&service), config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(addr = %listener.local_addr()?, "facevaultd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facevaultd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
