use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::BackendKind;
use models::object::KeyLayout;
use services::{
    backend::ObjectBackend, memory_backend::MemoryBackend, s3_backend::S3Backend,
    storage_service::StorageService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + one-shot upload ---
    let (cfg, upload) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting file-gateway with config: {:?}", cfg);

    // --- Backend client, built once and shared ---
    let backend: Arc<dyn ObjectBackend> = match cfg.backend {
        BackendKind::S3 => Arc::new(S3Backend::from_config(&cfg).await),
        BackendKind::Memory => {
            tracing::warn!("Using the in-memory backend; files are lost on exit");
            Arc::new(MemoryBackend::new())
        }
    };

    let layout = if cfg.legacy_bucket_paths {
        KeyLayout::LegacyBucketPath
    } else {
        KeyLayout::Prefix
    };

    // --- Initialize core service ---
    let storage = StorageService::new(backend, cfg.bucket.clone())
        .with_layout(layout)
        .with_read_concurrency(cfg.read_concurrency);

    // --- Handle one-shot upload mode ---
    if let Some(job) = upload {
        storage
            .upload_file(&job.path, job.folder.as_deref())
            .await
            .with_context(|| format!("uploading {}", job.path.display()))?;
        tracing::info!("Upload complete.");
        return Ok(()); // exit after upload
    }

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(storage);

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

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
