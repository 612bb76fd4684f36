use anyhow::Result;
use pulsemon_common::crypto;
use pulsemon_server::config::{Ipv4Cidr, ServerConfig};
use pulsemon_server::state::{AppState, SnapshotPolicy};
use pulsemon_server::{app, snapshot};
use pulsemon_storage::{MemStorage, SqliteStorage, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load(&config_path)?;

    tracing::info!(
        addr = %config.addr,
        store_interval = config.store_interval_secs,
        file = %config.file_storage_path,
        restore = config.restore,
        database = config.database_path.is_some(),
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        "pulsemon-server starting"
    );

    let storage: Arc<dyn Storage> = match &config.database_path {
        Some(path) => Arc::new(SqliteStorage::open(Path::new(path))?),
        None => Arc::new(MemStorage::new()),
    };

    let private_key = match &config.crypto_key {
        Some(path) => Some(Arc::new(crypto::load_private_key(Path::new(path))?)),
        None => None,
    };
    let trusted_subnet: Option<Ipv4Cidr> = match &config.trusted_subnet {
        Some(cidr) => Some(cidr.parse()?),
        None => None,
    };
    let snapshot_policy = if config.file_storage_path.is_empty() {
        None
    } else {
        Some(Arc::new(SnapshotPolicy {
            path: PathBuf::from(&config.file_storage_path),
            interval: Duration::from_secs(config.store_interval_secs),
        }))
    };

    let state = AppState {
        storage,
        integrity_key: config.key.clone().map(Arc::new),
        private_key,
        require_encryption: config.require_encryption,
        trusted_subnet,
        snapshot: snapshot_policy,
    };

    snapshot::restore_on_start(&state, config.restore).await;
    let periodic_save = snapshot::spawn_periodic_save(&state);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    let router = app::build_router(state.clone());
    tracing::info!(addr = %config.addr, "listening");

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down gracefully");
            signal_token.cancel();
        }
    });

    let shutdown = token.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    tokio::select! {
        _ = token.cancelled() => {
            // Bounded drain of in-flight handlers.
            match tokio::time::timeout(Duration::from_secs(5), &mut server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => tracing::error!(error = %err, "server error"),
                Ok(Err(err)) => tracing::error!(error = %err, "server task failed"),
                Err(_) => {
                    tracing::warn!("shutdown deadline exceeded");
                    server.abort();
                }
            }
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(error = %err, "server error"),
                Err(err) => tracing::error!(error = %err, "server task failed"),
            }
        }
    }

    if let Some(handle) = periodic_save {
        handle.abort();
    }
    snapshot::final_save(&state).await;
    tracing::info!("Server stopped");
    Ok(())
}
