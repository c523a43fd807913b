//! Host resource sampling fed into the `custom` gauges and policy resource checks.

use parking_lot::Mutex;
use sysinfo::{CpuExt, System, SystemExt};

/// CPU and memory utilisation, both in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Source of live resource readings, sampled at batch boundaries.
pub trait ResourceMonitor: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// Samples the local host with sysinfo.
///
/// CPU usage is measured between consecutive refreshes, so the first sample after
/// construction reads low.
pub struct SysinfoMonitor {
    system: Mutex<System>,
}

impl SysinfoMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SysinfoMonitor {
    fn sample(&self) -> ResourceSample {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();

        let total = system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };

        ResourceSample {
            cpu_percent: f64::from(system.global_cpu_info().cpu_usage()),
            memory_percent,
        }
    }
}

/// Returns a fixed reading; for tests and callers that push telemetry from elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticMonitor(pub ResourceSample);

impl StaticMonitor {
    #[must_use]
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self(ResourceSample {
            cpu_percent,
            memory_percent,
        })
    }
}

impl ResourceMonitor for StaticMonitor {
    fn sample(&self) -> ResourceSample {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_sample_is_a_percentage() {
        let monitor = SysinfoMonitor::new();
        let sample = monitor.sample();
        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!(sample.cpu_percent >= 0.0);
    }
}
