use std::fmt;

use serde::Serialize;

use super::store::TelemetryStore;
use super::window::SummaryWindow;
use crate::telemetry::{readable_time, MetricKind};

const BANNER_WIDTH: usize = 60;
const CRITICAL_PERCENT: f64 = 90.0;

/// Load band of a percentage reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLevel {
    Normal,
    Elevated,
    Critical,
}

impl LoadLevel {
    /// Memory is elevated from 75%, CPU from 70%; both critical from 90%
    pub fn classify(kind: MetricKind, value: f64) -> Self {
        let elevated = match kind {
            MetricKind::Memory => 75.0,
            MetricKind::Cpu => 70.0,
        };
        if value >= CRITICAL_PERCENT {
            LoadLevel::Critical
        } else if value >= elevated {
            LoadLevel::Elevated
        } else {
            LoadLevel::Normal
        }
    }
}

impl fmt::Display for LoadLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadLevel::Normal => "normal",
            LoadLevel::Elevated => "elevated",
            LoadLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

fn metric_label(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Memory => "Memory",
        MetricKind::Cpu => "CPU",
    }
}

/// Lines logged for one summary
pub fn summary_lines(store: &TelemetryStore, window: &SummaryWindow) -> Vec<String> {
    if !store.has_readings() && window.messages == 0 {
        return vec!["SUMMARY | No data received yet".to_string()];
    }

    let banner = "=".repeat(BANNER_WIDTH);
    let counts = store.counts();
    let mut lines = vec![
        banner.clone(),
        "MONITORING SUMMARY".to_string(),
        format!(
            "Window: {} -> {}",
            readable_time(window.window_start),
            readable_time(window.window_end)
        ),
        format!(
            "Total messages: Memory={}, CPU={}, Messages={}",
            counts.memory, counts.cpu, counts.messages
        ),
    ];

    for (sensor_id, readings) in store.latest() {
        if readings.is_empty() {
            continue;
        }
        lines.push(format!("Sensor: {}", sensor_id));
        for (kind, reading) in readings {
            lines.push(format!(
                "{}: {:.1}% @ {} [{}]",
                metric_label(*kind),
                reading.value,
                reading.readable_time,
                LoadLevel::classify(*kind, reading.value)
            ));
        }
    }

    if window.series.is_empty() {
        lines.push("No samples in this window".to_string());
    }
    for series in &window.series {
        let s = &series.stats;
        lines.push(format!(
            "{} {}: n={} min={:.1} max={:.1} mean={:.1} last={:.1}",
            series.sensor_id,
            series.metric,
            s.count,
            s.min,
            s.max,
            s.mean,
            s.last
        ));
    }
    lines.push(format!("Messages this window: {}", window.messages));
    lines.push(banner);
    lines
}
