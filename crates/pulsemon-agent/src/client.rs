use crate::collect::host::HostSampler;
use crate::collect::runtime::RuntimeSampler;
use crate::collect::Sampler;
use flate2::write::GzEncoder;
use flate2::Compression;
use pulsemon_common::crypto::{self, CryptoError};
use pulsemon_common::hash::body_tag;
use pulsemon_common::model::Metric;
use pulsemon_common::retry::{with_retry, Retryable};
use pulsemon_storage::{MemStorage, Storage, StorageError};
use reqwest::header;
use rsa::RsaPublicKey;
use serde::Serialize;
use std::io::Write;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("marshal payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("gzip body: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("seal body: {0}")]
    Seal(#[from] CryptoError),
    #[error("send request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("enumerate metrics: {0}")]
    Storage(#[from] StorageError),
    #[error("unexpected status: {0}")]
    UnexpectedStatus(u16),
}

impl Retryable for DeliveryError {
    fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct ClientOptions {
    pub server_addr: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub client_timeout: Duration,
    /// Bounds both the worker-pool size and the work-queue capacity, so at
    /// most this many requests are in flight at once.
    pub rate_limit: usize,
    pub key: Option<String>,
    pub public_key: Option<RsaPublicKey>,
}

/// The agent: two sampler loops staging metrics into a shared store, a
/// dispatcher enumerating the store on the report cadence, and a bounded
/// worker pool delivering one metric per request.
pub struct Client {
    storage: Arc<MemStorage>,
    http: reqwest::Client,
    opts: ClientOptions,
    real_ip: String,
}

/// Local IPv4 the OS would route outbound traffic through, discovered by a
/// UDP connect without sending anything. An empty string when detection
/// fails; the header is then omitted.
fn detect_outbound_ip() -> String {
    let Ok(socket) = UdpSocket::bind(("0.0.0.0", 0)) else {
        return String::new();
    };
    if socket.connect(("8.8.8.8", 80)).is_err() {
        return String::new();
    }
    match socket.local_addr() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => String::new(),
    }
}

impl Client {
    pub fn new(storage: Arc<MemStorage>, opts: ClientOptions) -> Self {
        Self {
            storage,
            http: reqwest::Client::new(),
            opts,
            real_ip: detect_outbound_ip(),
        }
    }

    /// POSTs `payload` as gzipped JSON. The integrity tag covers the
    /// gzipped bytes; when a public key is configured the gzipped body is
    /// then sealed into the hybrid envelope and the headers rewritten.
    async fn post_gzip_json<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<u16, DeliveryError> {
        let raw = serde_json::to_vec(payload)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        let gzipped = encoder.finish()?;

        let tag = self.opts.key.as_deref().map(|key| body_tag(&gzipped, key));
        let (body, encrypted) = match &self.opts.public_key {
            Some(public_key) => (crypto::seal(public_key, &gzipped)?, true),
            None => (gzipped, false),
        };

        let url = format!("{}{}", self.opts.server_addr, path);
        let status = with_retry(|| {
            let request = self.build_request(&url, &body, tag.as_deref(), encrypted);
            async move {
                let response = request.send().await?;
                Ok::<_, DeliveryError>(response.status().as_u16())
            }
        })
        .await?;
        Ok(status)
    }

    fn build_request(
        &self,
        url: &str,
        body: &[u8],
        tag: Option<&str>,
        encrypted: bool,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(url)
            .timeout(self.opts.client_timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if encrypted {
            request = request.header("X-Encrypted", "v1");
        } else {
            request = request.header(header::CONTENT_ENCODING, "gzip");
        }
        if !self.real_ip.is_empty() {
            request = request.header("X-Real-IP", self.real_ip.as_str());
        }
        if let Some(tag) = tag {
            request = request.header("HashSHA256", tag);
        }
        request
    }

    /// Delivers one metric to `/update/`.
    pub async fn send_metric(&self, metric: &Metric) -> Result<(), DeliveryError> {
        let status = self.post_gzip_json("/update/", metric).await?;
        if status != 200 {
            return Err(DeliveryError::UnexpectedStatus(status));
        }
        Ok(())
    }

    /// Delivers the whole store as one array to `/updates/`. An empty store
    /// sends nothing.
    pub async fn send_batch(&self) -> Result<(), DeliveryError> {
        let all = self.storage.get_all().await?;
        if all.is_empty() {
            return Ok(());
        }
        let metrics: Vec<Metric> = all.into_values().collect();
        let status = self.post_gzip_json("/updates/", &metrics).await?;
        if status != 200 {
            return Err(DeliveryError::UnexpectedStatus(status));
        }
        Ok(())
    }

    /// Runs the sampler loops, dispatcher and worker pool until `token` is
    /// cancelled, then drains the queue, joins every task and returns the
    /// "canceled" error.
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> anyhow::Result<()> {
        let rate_limit = self.opts.rate_limit.max(1);
        let (tx, rx) = mpsc::channel::<Metric>(rate_limit);
        let rx = Arc::new(Mutex::new(rx));

        let mut tasks = Vec::with_capacity(rate_limit + 3);
        tasks.push(tokio::spawn(sampler_loop(
            RuntimeSampler::new(),
            self.storage.clone(),
            self.opts.poll_interval,
            token.clone(),
        )));
        tasks.push(tokio::spawn(sampler_loop(
            HostSampler::new(),
            self.storage.clone(),
            self.opts.poll_interval,
            token.clone(),
        )));
        tasks.push(tokio::spawn(dispatch_loop(
            self.storage.clone(),
            tx,
            self.opts.report_interval,
            token.clone(),
        )));
        for _ in 0..rate_limit {
            tasks.push(tokio::spawn(worker_loop(self.clone(), rx.clone())));
        }

        token.cancelled().await;
        for task in tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "agent task failed to join");
            }
        }
        anyhow::bail!("canceled")
    }
}

/// Samples on every tick and stages the results into the shared store.
/// Sampling and staging failures are logged and never stop the loop.
async fn sampler_loop<S: Sampler + 'static>(
    mut sampler: S,
    storage: Arc<MemStorage>,
    every: Duration,
    token: CancellationToken,
) {
    if every.is_zero() {
        return;
    }
    let mut tick = interval(every);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let samples = match sampler.sample() {
                    Ok(samples) => samples,
                    Err(err) => {
                        tracing::warn!(sampler = sampler.name(), error = %err, "sampling failed");
                        continue;
                    }
                };
                for mut metric in samples {
                    if let Err(err) = storage.save(&mut metric).await {
                        tracing::warn!(
                            sampler = sampler.name(),
                            id = %metric.id,
                            error = %err,
                            "failed to stage sample"
                        );
                    }
                }
            }
            _ = token.cancelled() => return,
        }
    }
}

/// Enumerates the store on every report tick and enqueues each metric.
/// The bounded channel is the admission control: a full queue blocks the
/// dispatcher rather than dropping work. On cancellation the store is
/// drained once more before the sender closes.
async fn dispatch_loop(
    storage: Arc<MemStorage>,
    tx: mpsc::Sender<Metric>,
    every: Duration,
    token: CancellationToken,
) {
    if every.is_zero() {
        token.cancelled().await;
    } else {
        let mut tick = interval(every);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match storage.get_all().await {
                        Ok(all) => {
                            for (_, metric) in all {
                                if tx.send(metric).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "failed to enumerate metrics"),
                    }
                }
                _ = token.cancelled() => break,
            }
        }
    }
    if let Ok(all) = storage.get_all().await {
        for (_, metric) in all {
            if tx.send(metric).await.is_err() {
                break;
            }
        }
    }
    // Dropping the sender closes the channel; workers drain what is left.
}

/// One delivery per metric, the whole exchange (retries included) bounded
/// by the client timeout.
async fn worker_loop(client: Arc<Client>, rx: Arc<Mutex<mpsc::Receiver<Metric>>>) {
    loop {
        let next = { rx.lock().await.recv().await };
        match next {
            Some(metric) => {
                let deadline = client.opts.client_timeout;
                match tokio::time::timeout(deadline, client.send_metric(&metric)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::warn!(id = %metric.id, error = %err, "delivery failed")
                    }
                    Err(_) => tracing::warn!(id = %metric.id, "delivery timed out"),
                }
            }
            None => return,
        }
    }
}
