use crate::config::Ipv4Cidr;
use pulsemon_storage::Storage;
use rsa::RsaPrivateKey;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot destination and cadence. A zero interval means a synchronous
/// snapshot after every successful write instead of a periodic one.
#[derive(Clone)]
pub struct SnapshotPolicy {
    pub path: PathBuf,
    pub interval: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub integrity_key: Option<Arc<String>>,
    pub private_key: Option<Arc<RsaPrivateKey>>,
    pub require_encryption: bool,
    pub trusted_subnet: Option<Ipv4Cidr>,
    pub snapshot: Option<Arc<SnapshotPolicy>>,
}
