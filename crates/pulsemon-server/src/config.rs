use serde::Deserialize;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Seconds between periodic snapshots. Zero switches to a synchronous
    /// snapshot after every successful write.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: String,
    /// Restore the snapshot file on startup.
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// SQLite database path. Set: relational storage; unset: in-memory
    /// storage with file snapshotting.
    pub database_path: Option<String>,
    /// Shared secret for the HashSHA256 integrity tag.
    pub key: Option<String>,
    /// Path to the RSA private key PEM; set to accept hybrid-encrypted
    /// request bodies.
    pub crypto_key: Option<String>,
    /// When a private key is configured, reject requests that do not carry
    /// an encrypted envelope.
    #[serde(default = "default_require_encryption")]
    pub require_encryption: bool,
    /// IPv4 CIDR, e.g. "192.168.1.0/24". Requests must carry an X-Real-IP
    /// inside the subnet. An agent whose outbound-IP probe failed sends no
    /// X-Real-IP at all and will be rejected here; do not combine such
    /// agents with a trusted subnet.
    pub trusted_subnet: Option<String>,
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> String {
    "./tmp/metrics-db.json".to_string()
}

fn default_restore() -> bool {
    true
}

fn default_require_encryption() -> bool {
    true
}

impl ServerConfig {
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
}

/// An IPv4 network in CIDR notation. Parsed once at startup; a malformed
/// subnet fails construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: u32,
    mask: u32,
}

impl Ipv4Cidr {
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask == self.network
    }
}

impl std::str::FromStr for Ipv4Cidr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("invalid CIDR {s:?}: missing prefix"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid CIDR {s:?}: bad address"))?;
        let prefix: u32 = prefix
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid CIDR {s:?}: bad prefix"))?;
        if prefix > 32 {
            anyhow::bail!("invalid CIDR {s:?}: prefix out of range");
        }
        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        };
        Ok(Self {
            network: u32::from(addr) & mask,
            mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.addr, "0.0.0.0:8080");
        assert_eq!(config.store_interval_secs, 300);
        assert_eq!(config.file_storage_path, "./tmp/metrics-db.json");
        assert!(config.restore);
        assert!(config.database_path.is_none());
        assert!(config.trusted_subnet.is_none());
    }

    #[test]
    fn cidr_membership() {
        let cidr: Ipv4Cidr = "192.168.1.0/24".parse().unwrap();
        assert!(cidr.contains("192.168.1.42".parse().unwrap()));
        assert!(!cidr.contains("192.168.2.1".parse().unwrap()));

        let any: Ipv4Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains("8.8.8.8".parse().unwrap()));

        let single: Ipv4Cidr = "10.0.0.7/32".parse().unwrap();
        assert!(single.contains("10.0.0.7".parse().unwrap()));
        assert!(!single.contains("10.0.0.8".parse().unwrap()));
    }

    #[test]
    fn malformed_cidr_fails() {
        assert!("192.168.1.0".parse::<Ipv4Cidr>().is_err());
        assert!("bogus/24".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
    }
}
