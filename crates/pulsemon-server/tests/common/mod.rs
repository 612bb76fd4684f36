#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pulsemon_server::app::build_router;
use pulsemon_server::config::Ipv4Cidr;
use pulsemon_server::state::{AppState, SnapshotPolicy};
use pulsemon_storage::{MemStorage, SqliteStorage, Storage};
use rsa::RsaPrivateKey;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: Router,
}

pub struct TestContextBuilder {
    integrity_key: Option<String>,
    private_key: Option<RsaPrivateKey>,
    require_encryption: bool,
    trusted_subnet: Option<String>,
    snapshot: Option<(Option<PathBuf>, Duration)>,
    sqlite: bool,
}

impl TestContextBuilder {
    pub fn new() -> Self {
        Self {
            integrity_key: None,
            private_key: None,
            require_encryption: true,
            trusted_subnet: None,
            snapshot: None,
            sqlite: false,
        }
    }

    pub fn integrity_key(mut self, key: &str) -> Self {
        self.integrity_key = Some(key.to_string());
        self
    }

    pub fn private_key(mut self, key: RsaPrivateKey) -> Self {
        self.private_key = Some(key);
        self
    }

    pub fn optional_encryption(mut self) -> Self {
        self.require_encryption = false;
        self
    }

    pub fn trusted_subnet(mut self, cidr: &str) -> Self {
        self.trusted_subnet = Some(cidr.to_string());
        self
    }

    /// Snapshot into the context's temp dir.
    pub fn snapshot(mut self, interval: Duration) -> Self {
        self.snapshot = Some((None, interval));
        self
    }

    /// Snapshot into an explicit file, for restore-across-contexts tests.
    pub fn snapshot_file(mut self, path: PathBuf, interval: Duration) -> Self {
        self.snapshot = Some((Some(path), interval));
        self
    }

    pub fn sqlite(mut self) -> Self {
        self.sqlite = true;
        self
    }

    pub fn build(self) -> TestContext {
        let temp_dir = tempfile::tempdir().expect("temp dir should create");
        let storage: Arc<dyn Storage> = if self.sqlite {
            Arc::new(
                SqliteStorage::open(&temp_dir.path().join("metrics.db"))
                    .expect("sqlite storage should open"),
            )
        } else {
            Arc::new(MemStorage::new())
        };
        let snapshot = self.snapshot.map(|(path, interval)| {
            Arc::new(SnapshotPolicy {
                path: path.unwrap_or_else(|| temp_dir.path().join("metrics-db.json")),
                interval,
            })
        });
        let trusted_subnet: Option<Ipv4Cidr> = self
            .trusted_subnet
            .map(|cidr| cidr.parse().expect("test CIDR should parse"));

        let state = AppState {
            storage,
            integrity_key: self.integrity_key.map(Arc::new),
            private_key: self.private_key.map(Arc::new),
            require_encryption: self.require_encryption,
            trusted_subnet,
            snapshot,
        };
        TestContext {
            temp_dir,
            app: build_router(state.clone()),
            state,
        }
    }
}

pub fn build_test_context() -> TestContext {
    TestContextBuilder::new().build()
}

/// Drives one request through the router and collects the response.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder
        .body(Body::from(body))
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should not fail");
    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .expect("response body should read");
    (parts.status, parts.headers, bytes.to_vec())
}

pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    json: serde_json::Value,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    send(
        app,
        method,
        uri,
        &[("Content-Type", "application/json")],
        json.to_string().into_bytes(),
    )
    .await
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write should succeed");
    encoder.finish().expect("gzip finish should succeed")
}

pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut decoder = GzDecoder::new(data);
    let mut plain = Vec::new();
    decoder
        .read_to_end(&mut plain)
        .expect("gunzip should succeed");
    plain
}

pub fn test_private_key() -> RsaPrivateKey {
    RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("key generation should succeed")
}
