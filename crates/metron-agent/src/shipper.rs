//! Turns the shared snapshot into signed, compressed (and optionally
//! encrypted) `POST /updates` requests.

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use metron_collector::catalog;
use metron_collector::schedule::SharedSnapshot;
use metron_common::crypto::Encryptor;
use metron_common::error::WireError;
use metron_common::retry::{retry, RetryError, BACKOFF_SCHEDULE};
use metron_common::types::Metric;
use metron_common::{compress, signature, HASH_HEADER, JSON_CONTENT_TYPE, REAL_IP_HEADER};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("failed to encode batch: {0}")]
    Encode(#[from] WireError),

    #[error("shutdown requested")]
    Cancelled,
}

impl ShipError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ShipError::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

/// One chunk ready to go on the wire.
#[derive(Debug, Clone)]
pub struct Payload {
    pub body: Vec<u8>,
    pub signature: Option<String>,
}

struct Inner {
    client: reqwest::Client,
    url: String,
    key: Option<Vec<u8>>,
    encryptor: Option<Encryptor>,
    real_ip: Option<IpAddr>,
    send_size: usize,
    limit: Arc<Semaphore>,
    schedule: Vec<Duration>,
}

#[derive(Clone)]
pub struct Shipper {
    inner: Arc<Inner>,
}

impl Shipper {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        Self::with_schedule(config, BACKOFF_SCHEDULE.to_vec())
    }

    /// Like [`Shipper::new`] with a custom retry backoff schedule.
    pub fn with_schedule(config: &AgentConfig, schedule: Vec<Duration>) -> Result<Self> {
        let encryptor = match &config.crypto_key {
            Some(path) => Some(
                Encryptor::load(path)
                    .with_context(|| format!("failed to load public key {}", path.display()))?,
            ),
            None => None,
        };
        let real_ip = outbound_ip(&config.address);
        if real_ip.is_none() {
            tracing::warn!(address = %config.address, "Outbound IP unknown, X-Real-IP omitted");
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                url: format!("http://{}/updates", config.address),
                key: config.key.as_ref().map(|k| k.as_bytes().to_vec()),
                encryptor,
                real_ip,
                send_size: config.send_size,
                limit: Arc::new(Semaphore::new(config.rate_limit)),
                schedule,
            }),
        })
    }

    /// Ships the snapshot every `every` until `cancel` fires.
    pub async fn run(&self, snapshot: SharedSnapshot, every: Duration, cancel: CancellationToken) {
        let mut tick = interval_at(Instant::now() + every, every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    self.flush(&snapshot, &cancel).await;
                }
            }
        }
        tracing::debug!("Shipper stopped");
    }

    /// Sends one report built from the current snapshot. Returns the number
    /// of metrics the server accepted.
    pub async fn flush(&self, snapshot: &SharedSnapshot, cancel: &CancellationToken) -> usize {
        let batch = {
            let guard = snapshot.read().await;
            catalog::build_batch(&guard)
        };
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build metric batch");
                return 0;
            }
        };

        let mut tasks = JoinSet::new();
        for chunk in split(batch, self.inner.send_size) {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.inner.limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let this = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let count = chunk.len();
                this.send_chunk(&chunk, &cancel).await.map(|_| count)
            });
        }

        let mut sent = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(count)) => sent += count,
                Ok(Err(ShipError::Cancelled)) => {
                    tracing::info!("Report abandoned on shutdown");
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Failed to ship metrics, batch dropped");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Shipping task panicked");
                }
            }
        }
        if sent > 0 {
            tracing::info!(count = sent, "Metrics reported");
        }
        sent
    }

    /// JSON, then gzip, then HMAC over the compressed bytes, then RSA.
    pub fn encode(&self, metrics: &[Metric]) -> Result<Payload, ShipError> {
        let json = serde_json::to_vec(metrics).map_err(WireError::from)?;
        let compressed = compress::gzip(&json).map_err(WireError::from)?;
        let signature = self
            .inner
            .key
            .as_deref()
            .map(|key| signature::sign(&compressed, key));
        let body = match &self.inner.encryptor {
            Some(encryptor) => encryptor.encrypt(&compressed)?,
            None => compressed,
        };
        Ok(Payload { body, signature })
    }

    async fn send_chunk(
        &self,
        metrics: &[Metric],
        cancel: &CancellationToken,
    ) -> Result<(), ShipError> {
        let payload = self.encode(metrics)?;
        retry(&self.inner.schedule, cancel, ShipError::is_transient, || {
            self.post(&payload)
        })
        .await
        .map_err(|e| match e {
            RetryError::Failed { error, .. } => error,
            RetryError::Cancelled { .. } => ShipError::Cancelled,
        })
    }

    async fn post(&self, payload: &Payload) -> Result<(), ShipError> {
        let mut request = self
            .inner
            .client
            .post(&self.inner.url)
            .header(CONTENT_ENCODING, "gzip")
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload.body.clone());
        if let Some(signature) = &payload.signature {
            request = request.header(HASH_HEADER, signature);
        }
        if let Some(ip) = self.inner.real_ip {
            request = request.header(REAL_IP_HEADER, ip.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ShipError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Splits a batch into chunks of at most `size` metrics; `0` keeps one chunk.
pub fn split(batch: Vec<Metric>, size: usize) -> Vec<Vec<Metric>> {
    if size == 0 || batch.len() <= size {
        return vec![batch];
    }
    batch.chunks(size).map(|c| c.to_vec()).collect()
}

/// The local address the OS would use to reach `address`. Connecting a UDP
/// socket sends nothing on the wire.
pub fn outbound_ip(address: &str) -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(address).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
