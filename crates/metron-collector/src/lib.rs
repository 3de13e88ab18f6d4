//! Metric sampling for the metron agent.
//!
//! Each [`Sampler`] owns a subset of the [`Snapshot`] fields: the runtime
//! sampler the allocator and process statistics (plus `PollCount` and
//! `RandomValue`), the system sampler host memory and CPU utilisation.
//! Samplers are driven on independent schedules by [`schedule::run_sampler`]
//! and the shipper turns a snapshot into wire records through [`catalog`].

pub mod catalog;
pub mod runtime;
pub mod schedule;
pub mod system;

use anyhow::Result;
use runtime::RuntimeStats;
use system::SystemStats;

/// The agent's view of the most recent samples.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub runtime: RuntimeStats,
    pub system: SystemStats,
    /// Number of completed runtime polls since start. Never reset.
    pub poll_count: i64,
    /// Uniform `[0, 1)` sample refreshed on every runtime poll.
    pub random_value: f64,
}

/// A periodic reader of one group of statistics.
///
/// Reading happens in [`Sampler::refresh`] without holding the snapshot
/// lock; [`Sampler::apply`] then copies the reading in under the write
/// lock. A failed refresh leaves the snapshot untouched.
pub trait Sampler: Send + Sync {
    /// Returns the sampler name, used for logging.
    fn name(&self) -> &str;

    /// Reads fresh statistics from the runtime or the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn refresh(&mut self) -> Result<()>;

    /// Writes the last successful reading into the snapshot.
    fn apply(&self, snapshot: &mut Snapshot);
}
