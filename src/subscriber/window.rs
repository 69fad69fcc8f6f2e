use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::telemetry::{MetricKind, MetricSample};

/// Aggregate of one (sensor, metric) series within a window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Value of the newest sample by timestamp
    pub last: f64,
    pub last_timestamp: f64,
    #[serde(skip)]
    sum: f64,
}

impl MetricStats {
    fn new(value: f64, timestamp: f64) -> Self {
        Self {
            count: 1,
            min: value,
            max: value,
            mean: value,
            last: value,
            last_timestamp: timestamp,
            sum: value,
        }
    }

    fn add(&mut self, value: f64, timestamp: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.mean = self.sum / self.count as f64;
        if timestamp >= self.last_timestamp {
            self.last = value;
            self.last_timestamp = timestamp;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub sensor_id: String,
    pub metric: MetricKind,
    pub stats: MetricStats,
}

/// Everything received between two summaries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryWindow {
    pub subscriber_id: String,
    pub window_start: f64,
    pub window_end: f64,
    /// Sorted by sensor id, then metric
    pub series: Vec<SeriesSummary>,
    /// Messenger messages received in the window
    pub messages: u64,
}

impl SummaryWindow {
    pub fn is_empty(&self) -> bool {
        self.series.is_empty() && self.messages == 0
    }

    pub fn sample_count(&self) -> u64 {
        self.series.iter().map(|s| s.stats.count).sum()
    }
}

/// Accumulates the open window and retains the most recent closed ones
#[derive(Debug)]
pub struct WindowAggregator {
    subscriber_id: String,
    window_start: f64,
    series: BTreeMap<(String, MetricKind), MetricStats>,
    messages: u64,
    retained: VecDeque<SummaryWindow>,
    retention: usize,
}

impl WindowAggregator {
    pub fn new(subscriber_id: String, started_at: f64, retention: usize) -> Self {
        Self {
            subscriber_id,
            window_start: started_at,
            series: BTreeMap::new(),
            messages: 0,
            retained: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn add_sample(&mut self, sample: &MetricSample) {
        self.series
            .entry((sample.sensor_id.clone(), sample.kind))
            .and_modify(|stats| stats.add(sample.value, sample.timestamp))
            .or_insert_with(|| MetricStats::new(sample.value, sample.timestamp));
    }

    pub fn add_message(&mut self) {
        self.messages += 1;
    }

    /// Closes the open window at `now` and starts the next one there
    pub fn close(&mut self, now: f64) -> SummaryWindow {
        let series = std::mem::take(&mut self.series)
            .into_iter()
            .map(|((sensor_id, metric), stats)| SeriesSummary {
                sensor_id,
                metric,
                stats,
            })
            .collect();

        let window = SummaryWindow {
            subscriber_id: self.subscriber_id.clone(),
            window_start: self.window_start,
            window_end: now.max(self.window_start),
            series,
            messages: std::mem::take(&mut self.messages),
        };
        self.window_start = window.window_end;

        if self.retained.len() == self.retention {
            self.retained.pop_front();
        }
        self.retained.push_back(window.clone());
        window
    }

    /// Closed windows, oldest first
    pub fn windows(&self) -> impl Iterator<Item = &SummaryWindow> {
        self.retained.iter()
    }
}
