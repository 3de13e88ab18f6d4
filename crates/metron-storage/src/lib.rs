//! Metric storage for metron-server.
//!
//! Two interchangeable back-ends implement [`DataStorage`]:
//! [`memory::MemStorage`] keeps gauges and counters in two maps behind
//! independent locks, [`sql::SqlStorage`] keeps them in the `gauges` and
//! `counters` tables through SeaORM. [`Storage`] owns one of them and
//! dispatches to it. [`snapshot::FileSnapshot`] persists the in-memory
//! store as JSON.

pub mod error;
pub mod memory;
pub mod snapshot;
pub mod sql;


use async_trait::async_trait;
use error::Result;
use memory::MemStorage;
use metron_common::types::Metric;
use serde::{Deserialize, Serialize};
use sql::SqlStorage;
use std::collections::BTreeMap;

/// The whole store at one instant. This is also the on-disk snapshot format:
/// `{"counter": {name: i64}, "gauge": {name: f64}}`.
///
/// # Examples
///
/// ```
/// use metron_storage::StoreSnapshot;
///
/// let snapshot: StoreSnapshot =
///     serde_json::from_str(r#"{"counter":{"PollCount":4},"gauge":{"Alloc":1.5}}"#).unwrap();
/// assert_eq!(snapshot.counter["PollCount"], 4);
/// assert_eq!(snapshot.metrics().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub counter: BTreeMap<String, i64>,
    #[serde(default)]
    pub gauge: BTreeMap<String, f64>,
}

impl StoreSnapshot {
    pub fn is_empty(&self) -> bool {
        self.counter.is_empty() && self.gauge.is_empty()
    }

    /// Flattens the snapshot into wire records, counters first, each group
    /// sorted by name.
    pub fn metrics(&self) -> Vec<Metric> {
        self.counter
            .iter()
            .map(|(name, total)| Metric::counter(name.clone(), *total))
            .chain(
                self.gauge
                    .iter()
                    .map(|(name, value)| Metric::gauge(name.clone(), *value)),
            )
            .collect()
    }
}

/// The storage contract shared by the in-memory and SQL back-ends.
#[async_trait]
pub trait DataStorage: Send + Sync {
    /// Replaces the value of a gauge.
    async fn set_gauge(&self, name: &str, value: f64) -> Result<()>;

    /// Overwrites the running total of a counter.
    async fn set_counter(&self, name: &str, total: i64) -> Result<()>;

    /// Adds `delta` to a counter (missing counts as 0) and returns the new total.
    async fn increase_counter(&self, name: &str, delta: i64) -> Result<i64>;

    /// Returns [`error::StorageError::NotExist`] if the gauge was never written.
    async fn get_gauge(&self, name: &str) -> Result<f64>;

    /// Returns [`error::StorageError::NotExist`] if the counter was never written.
    async fn get_counter(&self, name: &str) -> Result<i64>;

    /// Applies a validated batch in slice order and returns the stored
    /// records, counters carrying their new running totals.
    async fn set_metrics(&self, metrics: &[Metric]) -> Result<Vec<Metric>>;

    /// Reads every stored metric, whatever the back-end.
    async fn snapshot(&self) -> Result<StoreSnapshot>;

    /// Copies the in-memory maps for persistence. SQL returns `NotMemMode`.
    async fn mem_snapshot(&self) -> Result<StoreSnapshot>;

    /// Replaces the in-memory maps. SQL returns `NotMemMode`.
    async fn restore(&self, snapshot: StoreSnapshot) -> Result<()>;

    /// Checks that the back-end can serve requests.
    async fn ping(&self) -> Result<()>;

    /// Releases connections. Further calls may fail with `NoDbConnected`.
    async fn close(&self) -> Result<()>;
}

/// The back-end selected at boot.
pub enum Storage {
    Memory(MemStorage),
    Sql(SqlStorage),
}

impl Storage {
    pub fn memory() -> Self {
        Storage::Memory(MemStorage::new())
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Storage::Memory(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Storage::Memory(_) => "memory",
            Storage::Sql(_) => "sql",
        }
    }

    /// Clears and returns the "written since last save" flag. Always false
    /// for SQL, which persists on every write.
    pub fn take_dirty(&self) -> bool {
        match self {
            Storage::Memory(m) => m.take_dirty(),
            Storage::Sql(_) => false,
        }
    }

    /// Re-arms the dirty flag after a failed save.
    pub fn mark_dirty(&self) {
        if let Storage::Memory(m) = self {
            m.mark_dirty();
        }
    }

    fn backend(&self) -> &dyn DataStorage {
        match self {
            Storage::Memory(m) => m,
            Storage::Sql(s) => s,
        }
    }
}

#[async_trait]
impl DataStorage for Storage {
    async fn set_gauge(&self, name: &str, value: f64) -> Result<()> {
        self.backend().set_gauge(name, value).await
    }

    async fn set_counter(&self, name: &str, total: i64) -> Result<()> {
        self.backend().set_counter(name, total).await
    }

    async fn increase_counter(&self, name: &str, delta: i64) -> Result<i64> {
        self.backend().increase_counter(name, delta).await
    }

    async fn get_gauge(&self, name: &str) -> Result<f64> {
        self.backend().get_gauge(name).await
    }

    async fn get_counter(&self, name: &str) -> Result<i64> {
        self.backend().get_counter(name).await
    }

    async fn set_metrics(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        self.backend().set_metrics(metrics).await
    }

    async fn snapshot(&self) -> Result<StoreSnapshot> {
        self.backend().snapshot().await
    }

    async fn mem_snapshot(&self) -> Result<StoreSnapshot> {
        self.backend().mem_snapshot().await
    }

    async fn restore(&self, snapshot: StoreSnapshot) -> Result<()> {
        self.backend().restore(snapshot).await
    }

    async fn ping(&self) -> Result<()> {
        self.backend().ping().await
    }

    async fn close(&self) -> Result<()> {
        self.backend().close().await
    }
}
