use crate::error::{Result, StorageError};
use crate::{DataStorage, StoreSnapshot};
use async_trait::async_trait;
use metron_common::error::WireError;
use metron_common::types::{Metric, MetricType};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Process-local store: one map per metric type, each behind its own lock.
///
/// Whenever both maps are needed the counters lock is taken first.
#[derive(Default)]
pub struct MemStorage {
    counters: RwLock<BTreeMap<String, i64>>,
    gauges: RwLock<BTreeMap<String, f64>>,
    dirty: AtomicBool,
}

fn add(name: &str, current: i64, delta: i64) -> Result<i64> {
    current
        .checked_add(delta)
        .ok_or_else(|| WireError::BadCounterValue(format!("{name} overflows i64")).into())
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

#[async_trait]
impl DataStorage for MemStorage {
    async fn set_gauge(&self, name: &str, value: f64) -> Result<()> {
        let counters = self.counters.read().await;
        if counters.contains_key(name) {
            return Err(StorageError::TypeConflict {
                name: name.to_string(),
                existing: MetricType::Counter,
            });
        }
        self.gauges.write().await.insert(name.to_string(), value);
        self.mark_dirty();
        Ok(())
    }

    async fn set_counter(&self, name: &str, total: i64) -> Result<()> {
        let mut counters = self.counters.write().await;
        if self.gauges.read().await.contains_key(name) {
            return Err(StorageError::TypeConflict {
                name: name.to_string(),
                existing: MetricType::Gauge,
            });
        }
        counters.insert(name.to_string(), total);
        self.mark_dirty();
        Ok(())
    }

    async fn increase_counter(&self, name: &str, delta: i64) -> Result<i64> {
        // Read and write happen under one write guard, so concurrent
        // increments of the same key never lose an update.
        let mut counters = self.counters.write().await;
        if self.gauges.read().await.contains_key(name) {
            return Err(StorageError::TypeConflict {
                name: name.to_string(),
                existing: MetricType::Gauge,
            });
        }
        let current = counters.get(name).copied().unwrap_or(0);
        let total = add(name, current, delta)?;
        counters.insert(name.to_string(), total);
        self.mark_dirty();
        Ok(total)
    }

    async fn get_gauge(&self, name: &str) -> Result<f64> {
        self.gauges
            .read()
            .await
            .get(name)
            .copied()
            .ok_or(StorageError::NotExist)
    }

    async fn get_counter(&self, name: &str) -> Result<i64> {
        self.counters
            .read()
            .await
            .get(name)
            .copied()
            .ok_or(StorageError::NotExist)
    }

    async fn set_metrics(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        let mut counters = self.counters.write().await;
        let mut gauges = self.gauges.write().await;

        // Resolve everything first so a conflict leaves both maps untouched.
        let mut kinds: HashMap<&str, MetricType> = HashMap::new();
        let mut totals: HashMap<&str, i64> = HashMap::new();
        let mut stored = Vec::with_capacity(metrics.len());
        for m in metrics {
            let kind = m.validate()?;
            let existing = if counters.contains_key(&m.id) {
                Some(MetricType::Counter)
            } else if gauges.contains_key(&m.id) {
                Some(MetricType::Gauge)
            } else {
                None
            };
            let seen = *kinds.entry(m.id.as_str()).or_insert(kind);
            let conflict = match existing {
                Some(existing) if existing != kind => Some(existing),
                _ if seen != kind => Some(seen),
                _ => None,
            };
            if let Some(existing) = conflict {
                return Err(StorageError::TypeConflict {
                    name: m.id.clone(),
                    existing,
                });
            }

            match kind {
                MetricType::Gauge => {
                    let value = m.value.ok_or_else(|| WireError::MissingValue(m.id.clone()))?;
                    stored.push(Metric::gauge(m.id.clone(), value));
                }
                MetricType::Counter => {
                    let delta = m.delta.ok_or_else(|| WireError::MissingDelta(m.id.clone()))?;
                    let current = match totals.get(m.id.as_str()) {
                        Some(total) => *total,
                        None => counters.get(&m.id).copied().unwrap_or(0),
                    };
                    let total = add(&m.id, current, delta)?;
                    totals.insert(m.id.as_str(), total);
                    stored.push(Metric::counter(m.id.clone(), total));
                }
            }
        }

        for m in &stored {
            match (m.delta, m.value) {
                (Some(total), _) => {
                    counters.insert(m.id.clone(), total);
                }
                (None, Some(value)) => {
                    gauges.insert(m.id.clone(), value);
                }
                (None, None) => {}
            }
        }
        if !stored.is_empty() {
            self.mark_dirty();
        }
        Ok(stored)
    }

    async fn snapshot(&self) -> Result<StoreSnapshot> {
        self.mem_snapshot().await
    }

    async fn mem_snapshot(&self) -> Result<StoreSnapshot> {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        Ok(StoreSnapshot {
            counter: counters.clone(),
            gauge: gauges.clone(),
        })
    }

    /// Replaces both maps. A name listed under both types is rejected and
    /// leaves the store untouched.
    async fn restore(&self, snapshot: StoreSnapshot) -> Result<()> {
        if let Some(name) = snapshot
            .counter
            .keys()
            .find(|name| snapshot.gauge.contains_key(*name))
        {
            return Err(StorageError::TypeConflict {
                name: name.clone(),
                existing: MetricType::Counter,
            });
        }
        let mut counters = self.counters.write().await;
        let mut gauges = self.gauges.write().await;
        *counters = snapshot.counter;
        *gauges = snapshot.gauge;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
