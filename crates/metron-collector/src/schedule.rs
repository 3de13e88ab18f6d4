use crate::{Sampler, Snapshot};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Snapshot shared between the samplers (writers) and the shipper (reader).
pub type SharedSnapshot = Arc<RwLock<Snapshot>>;

/// Drives one sampler every `every` until `cancel` fires.
///
/// A failed refresh is logged and the tick skipped; other samplers keep
/// running on their own schedule.
pub async fn run_sampler(
    mut sampler: Box<dyn Sampler>,
    snapshot: SharedSnapshot,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(sampler = sampler.name(), interval_secs = every.as_secs(), "Sampler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                if let Err(e) = sampler.refresh() {
                    tracing::warn!(sampler = sampler.name(), error = %e, "Sampling failed");
                    continue;
                }
                let mut snap = snapshot.write().await;
                sampler.apply(&mut snap);
            }
        }
    }

    tracing::info!(sampler = sampler.name(), "Sampler stopped");
}
