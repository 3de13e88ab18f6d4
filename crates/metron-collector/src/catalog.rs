//! Fixed wire names and how each one is read out of a [`Snapshot`].

use crate::Snapshot;
use metron_common::error::Result;
use metron_common::types::{Metric, MetricType, NumericIn};

/// One named gauge or counter and its extractor.
pub struct Source {
    pub name: &'static str,
    pub read: fn(&Snapshot) -> NumericIn,
}

/// Every gauge the agent must emit, in wire-contract order.
pub const GAUGES: &[Source] = &[
    Source { name: "Alloc", read: |s| s.runtime.alloc.into() },
    Source { name: "BuckHashSys", read: |s| s.runtime.buck_hash_sys.into() },
    Source { name: "Frees", read: |s| s.runtime.frees.into() },
    Source { name: "GCCPUFraction", read: |s| s.runtime.gc_cpu_fraction.into() },
    Source { name: "GCSys", read: |s| s.runtime.gc_sys.into() },
    Source { name: "HeapAlloc", read: |s| s.runtime.heap_alloc.into() },
    Source { name: "HeapIdle", read: |s| s.runtime.heap_idle.into() },
    Source { name: "HeapInuse", read: |s| s.runtime.heap_inuse.into() },
    Source { name: "HeapObjects", read: |s| s.runtime.heap_objects.into() },
    Source { name: "HeapReleased", read: |s| s.runtime.heap_released.into() },
    Source { name: "HeapSys", read: |s| s.runtime.heap_sys.into() },
    Source { name: "LastGC", read: |s| s.runtime.last_gc.into() },
    Source { name: "Lookups", read: |s| s.runtime.lookups.into() },
    Source { name: "MCacheInuse", read: |s| s.runtime.mcache_inuse.into() },
    Source { name: "MCacheSys", read: |s| s.runtime.mcache_sys.into() },
    Source { name: "MSpanInuse", read: |s| s.runtime.mspan_inuse.into() },
    Source { name: "MSpanSys", read: |s| s.runtime.mspan_sys.into() },
    Source { name: "Mallocs", read: |s| s.runtime.mallocs.into() },
    Source { name: "NextGC", read: |s| s.runtime.next_gc.into() },
    Source { name: "NumForcedGC", read: |s| s.runtime.num_forced_gc.into() },
    Source { name: "NumGC", read: |s| s.runtime.num_gc.into() },
    Source { name: "OtherSys", read: |s| s.runtime.other_sys.into() },
    Source { name: "PauseTotalNs", read: |s| s.runtime.pause_total_ns.into() },
    Source { name: "StackInuse", read: |s| s.runtime.stack_inuse.into() },
    Source { name: "StackSys", read: |s| s.runtime.stack_sys.into() },
    Source { name: "Sys", read: |s| s.runtime.sys.into() },
    Source { name: "TotalAlloc", read: |s| s.runtime.total_alloc.into() },
    Source { name: "RandomValue", read: |s| s.random_value.into() },
    Source { name: "TotalMemory", read: |s| s.system.total_memory.into() },
    Source { name: "FreeMemory", read: |s| s.system.free_memory.into() },
    Source { name: "CPUutilization", read: |s| s.system.cpu_utilization.into() },
];

/// Every counter the agent must emit.
pub const COUNTERS: &[Source] = &[Source { name: "PollCount", read: |s| s.poll_count.into() }];

/// Prefix of the per-core gauges `CPUutilization1..N`.
pub const PER_CPU_PREFIX: &str = "CPUutilization";

/// Builds the full report for one shipping tick.
pub fn build_batch(snapshot: &Snapshot) -> Result<Vec<Metric>> {
    let mut metrics =
        Vec::with_capacity(GAUGES.len() + COUNTERS.len() + snapshot.system.per_cpu.len());

    for source in GAUGES {
        let mut m = Metric::empty(source.name, MetricType::Gauge);
        m.set((source.read)(snapshot))?;
        metrics.push(m);
    }
    for (i, usage) in snapshot.system.per_cpu.iter().enumerate() {
        metrics.push(Metric::gauge(format!("{PER_CPU_PREFIX}{}", i + 1), *usage));
    }
    for source in COUNTERS {
        let mut m = Metric::empty(source.name, MetricType::Counter);
        m.set((source.read)(snapshot))?;
        metrics.push(m);
    }

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const REQUIRED_GAUGES: [&str; 31] = [
        "Alloc", "BuckHashSys", "Frees", "GCCPUFraction", "GCSys", "HeapAlloc", "HeapIdle",
        "HeapInuse", "HeapObjects", "HeapReleased", "HeapSys", "LastGC", "Lookups",
        "MCacheInuse", "MCacheSys", "MSpanInuse", "MSpanSys", "Mallocs", "NextGC",
        "NumForcedGC", "NumGC", "OtherSys", "PauseTotalNs", "StackInuse", "StackSys", "Sys",
        "TotalAlloc", "RandomValue", "TotalMemory", "FreeMemory", "CPUutilization",
    ];

    #[test]
    fn catalog_covers_the_wire_contract() {
        let names: HashSet<&str> = GAUGES.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), GAUGES.len(), "duplicate gauge name");
        for required in REQUIRED_GAUGES {
            assert!(names.contains(required), "missing gauge {required}");
        }
        assert_eq!(COUNTERS.len(), 1);
        assert_eq!(COUNTERS[0].name, "PollCount");
    }

    #[test]
    fn batch_carries_every_metric_with_valid_payload() {
        let mut snapshot = Snapshot::default();
        snapshot.poll_count = 7;
        snapshot.random_value = 0.25;
        snapshot.system.total_memory = 1 << 30;
        snapshot.system.per_cpu = vec![12.5, 80.0];
        snapshot.runtime.alloc = 2048;

        let batch = build_batch(&snapshot).unwrap();
        assert_eq!(batch.len(), GAUGES.len() + 2 + 1);
        for m in &batch {
            m.validate().unwrap();
        }

        let find = |id: &str| batch.iter().find(|m| m.id == id).unwrap();
        assert_eq!(find("PollCount").delta, Some(7));
        assert_eq!(find("RandomValue").value, Some(0.25));
        assert_eq!(find("Alloc").value, Some(2048.0));
        assert_eq!(find("TotalMemory").value, Some((1u64 << 30) as f64));
        assert_eq!(find("CPUutilization1").value, Some(12.5));
        assert_eq!(find("CPUutilization2").value, Some(80.0));
    }
}
