use crate::{Sampler, Snapshot};
use anyhow::{bail, Result};
use sysinfo::System;

/// Host memory and CPU utilisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemStats {
    pub total_memory: u64,
    pub free_memory: u64,
    /// Average utilisation across all logical CPUs, percent.
    pub cpu_utilization: f64,
    /// Utilisation per logical CPU, percent, in `sysinfo` order.
    pub per_cpu: Vec<f64>,
}

pub struct SystemSampler {
    system: System,
    reading: SystemStats,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; take the baseline now.
        system.refresh_cpu_all();
        Self {
            system,
            reading: SystemStats::default(),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn name(&self) -> &str {
        "system"
    }

    fn refresh(&mut self) -> Result<()> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let total = self.system.total_memory();
        if total == 0 {
            bail!("host memory statistics unavailable");
        }

        self.reading = SystemStats {
            total_memory: total,
            free_memory: self.system.free_memory(),
            cpu_utilization: self.system.global_cpu_usage() as f64,
            per_cpu: self
                .system
                .cpus()
                .iter()
                .map(|cpu| cpu.cpu_usage() as f64)
                .collect(),
        };
        Ok(())
    }

    fn apply(&self, snapshot: &mut Snapshot) {
        snapshot.system = self.reading.clone();
    }
}
