use crate::collect::Sampler;
use anyhow::Result;
use pulsemon_common::model::Metric;
use sysinfo::System;

/// Samples host-level memory totals and per-CPU utilisation.
pub struct HostSampler {
    system: System,
}

impl HostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for HostSampler {
    fn name(&self) -> &str {
        "host"
    }

    fn sample(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();

        let mut metrics = Vec::with_capacity(self.system.cpus().len() + 2);
        metrics.push(Metric::gauge("TotalMemory", self.system.total_memory() as f64));
        metrics.push(Metric::gauge("FreeMemory", self.system.free_memory() as f64));
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("CPUutilization{}", i + 1),
                cpu.cpu_usage() as f64,
            ));
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsemon_common::model::MetricType;

    #[test]
    fn reports_memory_totals_and_per_cpu_utilisation() {
        let mut sampler = HostSampler::new();
        let metrics = sampler.sample().unwrap();

        let total = metrics.iter().find(|m| m.id == "TotalMemory").unwrap();
        assert_eq!(total.mtype, MetricType::Gauge);
        assert!(metrics.iter().any(|m| m.id == "FreeMemory"));

        let cpu_count = metrics
            .iter()
            .filter(|m| m.id.starts_with("CPUutilization"))
            .count();
        assert!(cpu_count >= 1);
        assert!(metrics.iter().any(|m| m.id == "CPUutilization1"));
    }
}
