use std::time::{Duration, Instant};

use sysinfo::{MemoryRefreshKind, System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::telemetry::MetricKind;

/// Something a sensor can read a percentage from
pub trait MetricSource: Send {
    /// Current value of `kind` as a percentage (0-100)
    fn sample(&mut self, kind: MetricKind) -> f32;

    /// How long to wait before the first `sample(kind)` is meaningful
    fn warm_up(&self, _kind: MetricKind) -> Duration {
        Duration::ZERO
    }
}

/// Host resource readings
#[derive(Debug, Clone, Default)]
pub struct SystemStats {
    /// CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Used memory in bytes
    pub memory_used: u64,
    /// Total memory in bytes
    pub memory_total: u64,
}

impl SystemStats {
    /// Memory usage percentage (0-100)
    pub fn memory_percent(&self) -> f32 {
        if self.memory_total == 0 {
            0.0
        } else {
            (self.memory_used as f64 / self.memory_total as f64 * 100.0) as f32
        }
    }

    /// Value published for `kind`
    pub fn percent(&self, kind: MetricKind) -> f32 {
        let value = match kind {
            MetricKind::Memory => self.memory_percent(),
            MetricKind::Cpu => self.cpu_usage,
        };
        value.clamp(0.0, 100.0)
    }
}

/// Reads memory and CPU usage from the local host
pub struct SystemStatsCollector {
    system: System,
    stats: SystemStats,
    /// Time of the priming CPU refresh
    primed_at: Instant,
}

impl SystemStatsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one
        system.refresh_cpu_usage();
        system.refresh_memory();

        let stats = SystemStats {
            cpu_usage: system.global_cpu_usage(),
            memory_used: system.used_memory(),
            memory_total: system.total_memory(),
        };

        Self {
            system,
            stats,
            primed_at: Instant::now(),
        }
    }

    /// Refreshes only what `kind` needs
    pub fn refresh(&mut self, kind: MetricKind) {
        match kind {
            MetricKind::Memory => {
                self.system
                    .refresh_memory_specifics(MemoryRefreshKind::new().with_ram());
                self.stats.memory_used = self.system.used_memory();
                self.stats.memory_total = self.system.total_memory();
            }
            MetricKind::Cpu => {
                self.system.refresh_cpu_usage();
                self.stats.cpu_usage = self.system.global_cpu_usage();
            }
        }
    }

    /// Get current stats snapshot
    pub fn stats(&self) -> &SystemStats {
        &self.stats
    }
}

impl Default for SystemStatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SystemStatsCollector {
    fn sample(&mut self, kind: MetricKind) -> f32 {
        self.refresh(kind);
        self.stats.percent(kind)
    }

    /// CPU usage is a delta, so the first reading needs sysinfo's minimum
    /// interval since the priming refresh
    fn warm_up(&self, kind: MetricKind) -> Duration {
        match kind {
            MetricKind::Memory => Duration::ZERO,
            MetricKind::Cpu => MINIMUM_CPU_UPDATE_INTERVAL.saturating_sub(self.primed_at.elapsed()),
        }
    }
}
