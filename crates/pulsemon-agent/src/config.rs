use crate::client::ClientOptions;
use rsa::RsaPublicKey;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,
    /// Worker-pool size and work-queue capacity.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Shared secret for the HashSHA256 integrity tag.
    pub key: Option<String>,
    /// Path to the server's RSA public key PEM; set to enable hybrid
    /// encryption of request bodies.
    pub crypto_key: Option<String>,
}

fn default_server_addr() -> String {
    "http://localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_client_timeout() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl AgentConfig {
    /// Loads the TOML config at `path`; a missing file yields the defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path, "config file not found, using defaults");
                String::new()
            }
            Err(err) => return Err(err.into()),
        };
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn client_options(&self, public_key: Option<RsaPublicKey>) -> ClientOptions {
        ClientOptions {
            server_addr: self.server_addr.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            report_interval: Duration::from_secs(self.report_interval_secs),
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            rate_limit: self.rate_limit,
            key: self.key.clone(),
            public_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.server_addr, "http://localhost:8080");
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.report_interval_secs, 10);
        assert!(config.rate_limit >= 1);
        assert!(config.key.is_none());
        assert!(config.crypto_key.is_none());
    }

    #[test]
    fn fields_override_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            server_addr = "http://metrics:9000"
            poll_interval_secs = 1
            rate_limit = 4
            key = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.server_addr, "http://metrics:9000");
        assert_eq!(config.poll_interval_secs, 1);
        assert_eq!(config.rate_limit, 4);
        assert_eq!(config.key.as_deref(), Some("secret"));
    }
}
