use crate::collect::Sampler;
use anyhow::Result;
use pulsemon_common::model::Metric;
use rand::Rng;
use sysinfo::{get_current_pid, Pid, ProcessesToUpdate, System};

/// Samples the agent's own process and runtime environment.
///
/// Besides the gauges, every invocation increments the `PollCount` counter
/// by exactly one and refreshes the `RandomValue` gauge with a fresh
/// uniform `[0,1)` draw.
pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
    poll_count: i64,
}

impl RuntimeSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self {
            system,
            pid: get_current_pid().ok(),
            poll_count: 0,
        }
    }

    /// Resets the poll counter, for tests.
    pub fn reset(&mut self) {
        self.poll_count = 0;
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

    fn sample(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();
        self.poll_count += 1;

        let mut metrics = Vec::with_capacity(20);

        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                let disk = process.disk_usage();
                metrics.push(Metric::gauge("ProcessResidentMemory", process.memory() as f64));
                metrics.push(Metric::gauge(
                    "ProcessVirtualMemory",
                    process.virtual_memory() as f64,
                ));
                metrics.push(Metric::gauge("ProcessCpuPercent", process.cpu_usage() as f64));
                metrics.push(Metric::gauge("ProcessRunTimeSeconds", process.run_time() as f64));
                metrics.push(Metric::gauge("ProcessDiskReadBytes", disk.read_bytes as f64));
                metrics.push(Metric::gauge(
                    "ProcessDiskWrittenBytes",
                    disk.written_bytes as f64,
                ));
                metrics.push(Metric::gauge(
                    "ProcessTotalDiskReadBytes",
                    disk.total_read_bytes as f64,
                ));
                metrics.push(Metric::gauge(
                    "ProcessTotalDiskWrittenBytes",
                    disk.total_written_bytes as f64,
                ));
            }
        }

        metrics.push(Metric::gauge("SwapTotal", self.system.total_swap() as f64));
        metrics.push(Metric::gauge("SwapUsed", self.system.used_swap() as f64));
        metrics.push(Metric::gauge("SwapFree", self.system.free_swap() as f64));

        let load = System::load_average();
        metrics.push(Metric::gauge("LoadAverage1", load.one));
        metrics.push(Metric::gauge("LoadAverage5", load.five));
        metrics.push(Metric::gauge("LoadAverage15", load.fifteen));
        metrics.push(Metric::gauge("SystemUptime", System::uptime() as f64));
        metrics.push(Metric::gauge("CpuCount", self.system.cpus().len() as f64));

        metrics.push(Metric::counter("PollCount", self.poll_count));
        metrics.push(Metric::gauge(
            "RandomValue",
            rand::thread_rng().gen::<f64>(),
        ));

        Ok(metrics)
    }
}
