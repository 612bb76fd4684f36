use anyhow::Result;
use pulsemon_agent::client::Client;
use pulsemon_agent::config::AgentConfig;
use pulsemon_common::crypto;
use pulsemon_storage::MemStorage;
use std::path::Path;
use std::sync::Arc;
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
        .unwrap_or_else(|| "config/agent.toml".to_string());
    let config = AgentConfig::load(&config_path)?;

    tracing::info!(
        server = %config.server_addr,
        poll_secs = config.poll_interval_secs,
        report_secs = config.report_interval_secs,
        rate_limit = config.rate_limit,
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        "pulsemon-agent starting"
    );

    let public_key = match &config.crypto_key {
        Some(path) => Some(crypto::load_public_key(Path::new(path))?),
        None => None,
    };

    let storage = Arc::new(MemStorage::new());
    let client = Arc::new(Client::new(storage, config.client_options(public_key)));

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down gracefully");
            shutdown.cancel();
        }
    });

    if let Err(reason) = client.run(token).await {
        tracing::info!(reason = %reason, "agent stopped");
    }
    Ok(())
}
