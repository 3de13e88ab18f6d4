//! Orchestrates storage and snapshot persistence for the HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metron_common::error::WireError;
use metron_common::types::{validate_batch, Metric, MetricType};
use metron_storage::error::StorageError;
use metron_storage::snapshot::FileSnapshot;
use metron_storage::{DataStorage, Storage};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::OPERATION_TIMEOUT;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Invalid(#[from] WireError),

    #[error("metric not found")]
    NotFound,

    #[error("{0}")]
    Storage(StorageError),

    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotExist => ServiceError::NotFound,
            StorageError::Invalid(w) => ServiceError::Invalid(w),
            other => ServiceError::Storage(other),
        }
    }
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Invalid(e) if e.is_bad_input() => StatusCode::BAD_REQUEST,
            ServiceError::Storage(e) if e.is_bad_input() => StatusCode::BAD_REQUEST,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            return (status, "Internal Server Error").into_response();
        }
        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// The stateless layer between handlers and [`Storage`].
///
/// With a snapshot file configured and a zero store interval, every
/// successful write is followed by a synchronous save.
pub struct MetricsService {
    storage: Arc<Storage>,
    file: Option<FileSnapshot>,
    // Held from taking the snapshot until the file is renamed into place.
    save_lock: Mutex<()>,
    sync_save: bool,
    op_timeout: Duration,
}

impl MetricsService {
    pub fn new(storage: Storage, file: Option<FileSnapshot>, store_interval: Duration) -> Self {
        let sync_save = file.is_some() && store_interval.is_zero() && storage.is_memory();
        Self {
            storage: Arc::new(storage),
            file,
            save_lock: Mutex::new(()),
            sync_save,
            op_timeout: OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    /// Stores one record. Counters come back with `delta` set to the new total.
    pub async fn set_metric(&self, metric: &Metric) -> Result<Metric> {
        let kind = metric.validate()?;
        self.bounded(async {
            let stored = match kind {
                MetricType::Gauge => {
                    let value = metric
                        .value
                        .ok_or_else(|| WireError::MissingValue(metric.id.clone()))?;
                    self.storage.set_gauge(&metric.id, value).await?;
                    Metric::gauge(metric.id.clone(), value)
                }
                MetricType::Counter => {
                    let delta = metric
                        .delta
                        .ok_or_else(|| WireError::MissingDelta(metric.id.clone()))?;
                    let total = self.storage.increase_counter(&metric.id, delta).await?;
                    Metric::counter(metric.id.clone(), total)
                }
            };
            self.after_write().await?;
            Ok(stored)
        })
        .await
    }

    /// Stores a batch in slice order.
    pub async fn set_metrics(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        validate_batch(metrics)?;
        self.bounded(async {
            let stored = self.storage.set_metrics(metrics).await?;
            self.after_write().await?;
            Ok(stored)
        })
        .await
    }

    /// Looks one metric up. Unknown types are reported as not found.
    pub async fn get_metric(&self, mtype: &str, id: &str) -> Result<Metric> {
        let kind: MetricType = mtype.parse().map_err(|_| ServiceError::NotFound)?;
        self.bounded(async {
            let metric = match kind {
                MetricType::Gauge => Metric::gauge(id, self.storage.get_gauge(id).await?),
                MetricType::Counter => Metric::counter(id, self.storage.get_counter(id).await?),
            };
            Ok(metric)
        })
        .await
    }

    /// Every stored metric, counters first, each group sorted by name.
    pub async fn list_all(&self) -> Result<Vec<Metric>> {
        self.bounded(async { Ok(self.storage.snapshot().await?.metrics()) })
            .await
    }

    pub async fn check_db(&self) -> Result<()> {
        self.bounded(async { Ok(self.storage.ping().await?) }).await
    }

    /// Writes the in-memory store to the snapshot file. A no-op without a
    /// file; `NotMemMode` for SQL storage.
    ///
    /// Saves are serialised, and each one copies the store after the previous
    /// save finished, so the file always ends at the newest state.
    pub async fn save_to_file(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().await;
        let snapshot = self.storage.mem_snapshot().await?;
        if let Err(e) = file.save(&snapshot).await {
            self.storage.mark_dirty();
            return Err(e.into());
        }
        Ok(())
    }

    /// Loads the snapshot file into the in-memory store.
    pub async fn restore(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let snapshot = file.load().await.map_err(ServiceError::Storage)?;
        let (counters, gauges) = (snapshot.counter.len(), snapshot.gauge.len());
        self.storage.restore(snapshot).await?;
        tracing::info!(
            path = %file.path().display(),
            counters,
            gauges,
            "Restored metrics from snapshot"
        );
        Ok(())
    }

    async fn after_write(&self) -> Result<()> {
        if !self.sync_save {
            return Ok(());
        }
        self.storage.take_dirty();
        match self.save_to_file().await {
            Err(ServiceError::Storage(StorageError::NotMemMode)) => Ok(()),
            other => other,
        }
    }

    /// Saves the snapshot every `every` while writes have happened since the
    /// last save. Returns once `cancel` fires.
    pub async fn run_periodic_save(&self, every: Duration, cancel: CancellationToken) {
        let mut tick = interval_at(Instant::now() + every, every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    if !self.storage.take_dirty() {
                        continue;
                    }
                    if let Err(e) = self.save_to_file().await {
                        tracing::error!(error = %e, "Periodic snapshot failed");
                    }
                }
            }
        }
        tracing::debug!("Periodic snapshot task stopped");
    }

    /// Unconditional save used on shutdown. Skipped for SQL storage.
    pub async fn final_save(&self) -> Result<()> {
        if self.file.is_none() || !self.storage.is_memory() {
            return Ok(());
        }
        self.storage.take_dirty();
        self.save_to_file().await?;
        tracing::info!("Final snapshot saved");
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        Ok(self.storage.close().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service_with_file(dir: &TempDir, interval: Duration) -> MetricsService {
        MetricsService::new(
            Storage::memory(),
            Some(FileSnapshot::new(dir.path().join("metrics-db.json"))),
            interval,
        )
    }

    fn read_snapshot(dir: &TempDir) -> serde_json::Value {
        let raw = std::fs::read(dir.path().join("metrics-db.json")).unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[tokio::test]
    async fn counter_write_returns_running_total() {
        let service = MetricsService::new(Storage::memory(), None, Duration::ZERO);
        for _ in 0..4 {
            service
                .set_metric(&Metric::counter("testCounter", 1))
                .await
                .unwrap();
        }
        let stored = service
            .set_metric(&Metric::counter("testCounter", 1))
            .await
            .unwrap();
        assert_eq!(stored.delta, Some(5));
    }

    #[tokio::test]
    async fn unknown_type_lookup_is_not_found() {
        let service = MetricsService::new(Storage::memory(), None, Duration::ZERO);
        let err = service.get_metric("histogram", "x").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = service.get_metric("gauge", "absent").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_record_is_bad_request() {
        let service = MetricsService::new(Storage::memory(), None, Duration::ZERO);
        let err = service
            .set_metric(&Metric::empty("g", MetricType::Gauge))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn zero_interval_saves_after_every_write() {
        let dir = TempDir::new().unwrap();
        let service = service_with_file(&dir, Duration::ZERO);

        service
            .set_metric(&Metric::counter("PollCount", 3))
            .await
            .unwrap();
        assert_eq!(read_snapshot(&dir)["counter"]["PollCount"], 3);

        service
            .set_metrics(&[Metric::gauge("Alloc", 2.5)])
            .await
            .unwrap();
        assert_eq!(read_snapshot(&dir)["gauge"]["Alloc"], 2.5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_writes_with_sync_save_all_succeed() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(service_with_file(&dir, Duration::ZERO));

        let mut tasks = Vec::new();
        for task in 0..32 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                let mut failures = 0;
                for i in 0..20 {
                    let metric = Metric::gauge(format!("g{task}"), f64::from(i));
                    if service.set_metric(&metric).await.is_err() {
                        failures += 1;
                    }
                }
                failures
            }));
        }
        let mut failures = 0;
        for task in tasks {
            failures += task.await.unwrap();
        }
        assert_eq!(failures, 0);

        let saved = read_snapshot(&dir);
        let gauges = saved["gauge"].as_object().unwrap();
        assert_eq!(gauges.len(), 32);
        assert!(gauges.values().all(|v| v.as_f64() == Some(19.0)));
        assert!(!dir.path().join("metrics-db.json.tmp").exists());
    }

    #[tokio::test]
    async fn restore_loads_what_was_saved() {
        let dir = TempDir::new().unwrap();
        let first = service_with_file(&dir, Duration::from_secs(300));
        first
            .set_metrics(&[Metric::counter("c", 7), Metric::gauge("g", 0.5)])
            .await
            .unwrap();
        first.final_save().await.unwrap();

        let second = service_with_file(&dir, Duration::from_secs(300));
        second.restore().await.unwrap();
        assert_eq!(second.get_metric("counter", "c").await.unwrap().delta, Some(7));
        assert_eq!(second.get_metric("gauge", "g").await.unwrap().value, Some(0.5));
    }

    #[tokio::test]
    async fn restore_without_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let service = service_with_file(&dir, Duration::from_secs(300));
        service.restore().await.unwrap();
        assert!(service.list_all().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_save_only_writes_when_dirty() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(service_with_file(&dir, Duration::from_secs(10)));
        let cancel = CancellationToken::new();
        let task = {
            let service = service.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                service
                    .run_periodic_save(Duration::from_secs(10), cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!dir.path().join("metrics-db.json").exists());

        service
            .set_metric(&Metric::gauge("Alloc", 1.0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(read_snapshot(&dir)["gauge"]["Alloc"], 1.0);

        cancel.cancel();
        task.await.unwrap();
    }
}
