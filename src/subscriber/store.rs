use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use super::report::LoadLevel;
use crate::telemetry::{readable_time, DecodeError, Inbound, MessageRecord, MetricKind, MetricSample};

/// Points kept per metric history
pub const METRIC_HISTORY_LEN: usize = 100;
/// Messenger messages kept
pub const MESSAGE_HISTORY_LEN: usize = 50;
/// Errors kept, newest last
pub const ERROR_HISTORY_LEN: usize = 10;

/// Latest value of one metric for one sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub value: f64,
    pub timestamp: f64,
    pub readable_time: String,
}

/// One entry of a metric history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub timestamp: f64,
    pub sensor_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub at: String,
    pub message: String,
}

/// Deliveries accepted per stream
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageCounts {
    pub memory: u64,
    pub cpu: u64,
    pub messages: u64,
    /// Redeliveries of the latest sample, dropped
    pub duplicates: u64,
    /// Samples older than the latest reading of their sensor
    pub out_of_order: u64,
}

/// Outcome of one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    /// `stale` samples were counted but did not replace the latest reading
    Metric { sample: MetricSample, stale: bool },
    Duplicate(MetricSample),
    Message(MessageRecord),
    Other { topic: String, body: serde_json::Value },
}

/// Averages over the retained histories
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub avg_memory: f64,
    pub avg_cpu: f64,
    pub memory_readings: usize,
    pub cpu_readings: usize,
    pub current_memory: f64,
    pub current_cpu: f64,
    pub memory_level: LoadLevel,
    pub cpu_level: LoadLevel,
}

/// Point-in-time copy of the store, served by the snapshot API
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub connected: bool,
    pub latest: BTreeMap<String, BTreeMap<MetricKind, Reading>>,
    pub counts: MessageCounts,
    pub memory_data: Vec<DataPoint>,
    pub cpu_data: Vec<DataPoint>,
    pub messages: Vec<MessageRecord>,
    pub errors: Vec<ErrorEntry>,
    pub stats: Statistics,
}

/// Everything the subscriber has learned from the bus
#[derive(Debug, Default)]
pub struct TelemetryStore {
    latest: BTreeMap<String, BTreeMap<MetricKind, Reading>>,
    counts: MessageCounts,
    memory_history: VecDeque<DataPoint>,
    cpu_history: VecDeque<DataPoint>,
    messages: VecDeque<MessageRecord>,
    errors: VecDeque<ErrorEntry>,
    connected: bool,
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(item);
}

fn average(points: &VecDeque<DataPoint>) -> f64 {
    if points.is_empty() {
        0.0
    } else {
        points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and applies a raw delivery. Decode failures are recorded in
    /// the error list before being returned.
    pub fn ingest(
        &mut self,
        topic: &str,
        payload: &[u8],
        received_at: f64,
    ) -> Result<Ingested, DecodeError> {
        match Inbound::decode(topic, payload, received_at) {
            Ok(inbound) => Ok(self.apply(inbound)),
            Err(e) => {
                self.record_error(e.to_string(), received_at);
                Err(e)
            }
        }
    }

    pub fn apply(&mut self, inbound: Inbound) -> Ingested {
        match inbound {
            Inbound::Metric(sample) => self.apply_sample(sample),
            Inbound::Message(record) => {
                self.counts.messages += 1;
                push_bounded(&mut self.messages, record.clone(), MESSAGE_HISTORY_LEN);
                Ingested::Message(record)
            }
            Inbound::Other { topic, body } => Ingested::Other { topic, body },
        }
    }

    fn apply_sample(&mut self, sample: MetricSample) -> Ingested {
        let readings = self.latest.entry(sample.sensor_id.clone()).or_default();
        let previous = readings.get(&sample.kind).map(|r| r.timestamp);

        // At-least-once delivery: same sensor, metric and timestamp is a redelivery
        if previous == Some(sample.timestamp) {
            self.counts.duplicates += 1;
            return Ingested::Duplicate(sample);
        }

        let stale = matches!(previous, Some(prev) if sample.timestamp < prev);
        if stale {
            self.counts.out_of_order += 1;
        } else {
            readings.insert(
                sample.kind,
                Reading {
                    value: sample.value,
                    timestamp: sample.timestamp,
                    readable_time: readable_time(sample.timestamp),
                },
            );
        }

        let point = DataPoint {
            timestamp: sample.timestamp,
            sensor_id: sample.sensor_id.clone(),
            value: sample.value,
        };
        match sample.kind {
            MetricKind::Memory => {
                self.counts.memory += 1;
                push_bounded(&mut self.memory_history, point, METRIC_HISTORY_LEN);
            }
            MetricKind::Cpu => {
                self.counts.cpu += 1;
                push_bounded(&mut self.cpu_history, point, METRIC_HISTORY_LEN);
            }
        }

        Ingested::Metric { sample, stale }
    }

    pub fn record_error(&mut self, message: String, at: f64) {
        push_bounded(
            &mut self.errors,
            ErrorEntry {
                at: readable_time(at),
                message,
            },
            ERROR_HISTORY_LEN,
        );
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn has_readings(&self) -> bool {
        self.latest.values().any(|r| !r.is_empty())
    }

    pub fn latest(&self) -> &BTreeMap<String, BTreeMap<MetricKind, Reading>> {
        &self.latest
    }

    pub fn counts(&self) -> &MessageCounts {
        &self.counts
    }

    pub fn errors(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.errors.iter()
    }

    pub fn statistics(&self) -> Statistics {
        let current_memory = self.memory_history.back().map(|p| p.value).unwrap_or(0.0);
        let current_cpu = self.cpu_history.back().map(|p| p.value).unwrap_or(0.0);
        Statistics {
            avg_memory: average(&self.memory_history),
            avg_cpu: average(&self.cpu_history),
            memory_readings: self.memory_history.len(),
            cpu_readings: self.cpu_history.len(),
            current_memory,
            current_cpu,
            memory_level: LoadLevel::classify(MetricKind::Memory, current_memory),
            cpu_level: LoadLevel::classify(MetricKind::Cpu, current_cpu),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connected: self.connected,
            latest: self.latest.clone(),
            counts: self.counts.clone(),
            memory_data: self.memory_history.iter().cloned().collect(),
            cpu_data: self.cpu_history.iter().cloned().collect(),
            messages: self.messages.iter().cloned().collect(),
            errors: self.errors.iter().cloned().collect(),
            stats: self.statistics(),
        }
    }
}
