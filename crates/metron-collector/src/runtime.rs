use crate::{Sampler, Snapshot};
use anyhow::{anyhow, Result};
use std::alloc::{GlobalAlloc, Layout, System as SystemAlloc};
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::{Pid, ProcessesToUpdate, System};

static LIVE_BYTES: AtomicU64 = AtomicU64::new(0);
static TOTAL_BYTES: AtomicU64 = AtomicU64::new(0);
static MALLOCS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);

/// Global allocator wrapper counting allocations for the runtime sampler.
///
/// Install it in the agent binary:
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: metron_collector::runtime::TrackingAllocator =
///     metron_collector::runtime::TrackingAllocator;
/// ```
///
/// Without it the allocator-derived gauges stay at zero.
pub struct TrackingAllocator;

fn record_alloc(size: usize) {
    LIVE_BYTES.fetch_add(size as u64, Ordering::Relaxed);
    TOTAL_BYTES.fetch_add(size as u64, Ordering::Relaxed);
    MALLOCS.fetch_add(1, Ordering::Relaxed);
}

fn record_free(size: usize) {
    LIVE_BYTES.fetch_sub(size as u64, Ordering::Relaxed);
    FREES.fetch_add(1, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = SystemAlloc.alloc(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = SystemAlloc.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        SystemAlloc.dealloc(ptr, layout);
        record_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = SystemAlloc.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            record_free(layout.size());
            record_alloc(new_size);
        }
        new_ptr
    }
}

/// Counters maintained by [`TrackingAllocator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub live_bytes: u64,
    pub total_bytes: u64,
    pub mallocs: u64,
    pub frees: u64,
}

pub fn allocator_stats() -> AllocatorStats {
    AllocatorStats {
        live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
        total_bytes: TOTAL_BYTES.load(Ordering::Relaxed),
        mallocs: MALLOCS.load(Ordering::Relaxed),
        frees: FREES.load(Ordering::Relaxed),
    }
}

/// Process runtime statistics, one field per runtime gauge on the wire.
///
/// The Rust runtime has no garbage collector and no size-class caches, so
/// the GC and cache fields are kept for wire compatibility and stay zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeStats {
    pub alloc: u64,
    pub buck_hash_sys: u64,
    pub frees: u64,
    pub gc_cpu_fraction: f64,
    pub gc_sys: u64,
    pub heap_alloc: u64,
    pub heap_idle: u64,
    pub heap_inuse: u64,
    pub heap_objects: u64,
    pub heap_released: u64,
    pub heap_sys: u64,
    pub last_gc: u64,
    pub lookups: u64,
    pub mcache_inuse: u64,
    pub mcache_sys: u64,
    pub mspan_inuse: u64,
    pub mspan_sys: u64,
    pub mallocs: u64,
    pub next_gc: u64,
    pub num_forced_gc: u32,
    pub num_gc: u32,
    pub other_sys: u64,
    pub pause_total_ns: u64,
    pub stack_inuse: u64,
    pub stack_sys: u64,
    pub sys: u64,
    pub total_alloc: u64,
}

impl RuntimeStats {
    /// Combines allocator counters with the process memory footprint.
    pub fn from_parts(heap: AllocatorStats, resident: u64, virtual_mem: u64) -> Self {
        Self {
            alloc: heap.live_bytes,
            heap_alloc: heap.live_bytes,
            heap_inuse: heap.live_bytes,
            heap_objects: heap.mallocs.saturating_sub(heap.frees),
            mallocs: heap.mallocs,
            frees: heap.frees,
            total_alloc: heap.total_bytes,
            heap_sys: resident,
            heap_idle: resident.saturating_sub(heap.live_bytes),
            sys: virtual_mem,
            other_sys: virtual_mem.saturating_sub(resident),
            ..Self::default()
        }
    }
}

/// Samples allocator and process statistics, bumps `PollCount` and draws
/// a fresh `RandomValue`.
pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
    reading: RuntimeStats,
}

impl RuntimeSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Current pid unavailable, process memory disabled");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
            reading: RuntimeStats::default(),
        }
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RuntimeSampler {
    fn name(&self) -> &str {
        "runtime"
    }

    fn refresh(&mut self) -> Result<()> {
        let heap = allocator_stats();
        let (resident, virtual_mem) = match self.pid {
            Some(pid) => {
                self.system
                    .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                let process = self
                    .system
                    .process(pid)
                    .ok_or_else(|| anyhow!("process {pid} not found"))?;
                (process.memory(), process.virtual_memory())
            }
            None => (0, 0),
        };
        self.reading = RuntimeStats::from_parts(heap, resident, virtual_mem);
        Ok(())
    }

    fn apply(&self, snapshot: &mut Snapshot) {
        snapshot.runtime = self.reading.clone();
        snapshot.poll_count += 1;
        snapshot.random_value = rand::random::<f64>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_map_onto_heap_fields() {
        let heap = AllocatorStats {
            live_bytes: 4096,
            total_bytes: 10_000,
            mallocs: 30,
            frees: 20,
        };
        let stats = RuntimeStats::from_parts(heap, 8192, 65536);
        assert_eq!(stats.alloc, 4096);
        assert_eq!(stats.heap_alloc, 4096);
        assert_eq!(stats.heap_objects, 10);
        assert_eq!(stats.total_alloc, 10_000);
        assert_eq!(stats.heap_sys, 8192);
        assert_eq!(stats.heap_idle, 4096);
        assert_eq!(stats.other_sys, 65536 - 8192);
        assert_eq!(stats.num_gc, 0);
    }

    #[test]
    fn apply_bumps_poll_count_and_random_value() {
        let mut sampler = RuntimeSampler::new();
        sampler.refresh().unwrap();
        let mut snapshot = Snapshot::default();
        sampler.apply(&mut snapshot);
        sampler.apply(&mut snapshot);
        assert_eq!(snapshot.poll_count, 2);
        assert!((0.0..1.0).contains(&snapshot.random_value));
    }
}
