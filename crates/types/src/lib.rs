//! Wire schema shared by every metricbus node.
//!
//! Sensors publish one JSON object per sample on a per-metric topic, the
//! messenger publishes free-text messages, and the subscriber decodes all
//! three back into [`Inbound`] values.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

pub const TOPIC_MEMORY: &str = "monitoring/memory";
pub const TOPIC_CPU: &str = "monitoring/cpu";
pub const TOPIC_MESSAGES: &str = "monitoring/messages";

/// Topics the subscriber listens on
pub const SUBSCRIBER_TOPICS: [&str; 3] = [TOPIC_MEMORY, TOPIC_CPU, TOPIC_MESSAGES];

const UNKNOWN_ID: &str = "unknown";
const EMPTY_MESSAGE: &str = "No message";

/// Host metric a sensor can publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Memory,
    Cpu,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Memory, MetricKind::Cpu];

    /// Topic samples of this kind are published on
    pub fn topic(&self) -> &'static str {
        match self {
            MetricKind::Memory => TOPIC_MEMORY,
            MetricKind::Cpu => TOPIC_CPU,
        }
    }

    /// JSON field carrying the percentage value
    pub fn value_field(&self) -> &'static str {
        match self {
            MetricKind::Memory => "system_memory",
            MetricKind::Cpu => "cpu_percent",
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            TOPIC_MEMORY => Some(MetricKind::Memory),
            TOPIC_CPU => Some(MetricKind::Cpu),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Memory => "memory",
            MetricKind::Cpu => "cpu",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown metric '{0}' (expected memory or cpu)")]
pub struct UnknownMetric(pub String);

impl FromStr for MetricKind {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" | "ram" => Ok(MetricKind::Memory),
            "cpu" => Ok(MetricKind::Cpu),
            other => Err(UnknownMetric(other.to_string())),
        }
    }
}

/// One reading taken by a sensor. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub sensor_id: String,
    pub kind: MetricKind,
    /// Percentage, 0-100
    pub value: f64,
    /// Unix time in seconds
    pub timestamp: f64,
}

impl MetricSample {
    pub fn topic(&self) -> &'static str {
        self.kind.topic()
    }
}

// The value field name depends on the metric, so the map is written by hand.
impl Serialize for MetricSample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.serialize_entry("sensor_id", &self.sensor_id)?;
        map.serialize_entry(self.kind.value_field(), &self.value)?;
        map.end()
    }
}

/// Free-text message relayed by a messenger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub timestamp: f64,
    pub messenger_id: String,
    pub message: String,
}

/// A decoded delivery from one of the monitoring topics
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Metric(MetricSample),
    Message(MessageRecord),
    /// Valid JSON on a topic we do not aggregate
    Other {
        topic: String,
        body: serde_json::Value,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON received from {topic}: {source}")]
    InvalidJson {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing '{field}' field in payload from {topic}")]
    MissingField { topic: String, field: &'static str },
}

#[derive(Debug, Deserialize)]
struct RawMetric {
    timestamp: Option<f64>,
    sensor_id: Option<String>,
    system_memory: Option<f64>,
    cpu_percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    timestamp: Option<f64>,
    messenger_id: Option<String>,
    message: Option<String>,
}

impl Inbound {
    /// Decodes a payload received on `topic`. `received_at` stands in for
    /// a missing timestamp.
    pub fn decode(topic: &str, payload: &[u8], received_at: f64) -> Result<Self, DecodeError> {
        let invalid = |source| DecodeError::InvalidJson {
            topic: topic.to_string(),
            source,
        };

        if let Some(kind) = MetricKind::from_topic(topic) {
            let raw: RawMetric = serde_json::from_slice(payload).map_err(invalid)?;
            let value = match kind {
                MetricKind::Memory => raw.system_memory,
                MetricKind::Cpu => raw.cpu_percent,
            }
            .ok_or(DecodeError::MissingField {
                topic: topic.to_string(),
                field: kind.value_field(),
            })?;
            return Ok(Inbound::Metric(MetricSample {
                sensor_id: raw.sensor_id.unwrap_or_else(|| UNKNOWN_ID.to_string()),
                kind,
                value,
                timestamp: raw.timestamp.unwrap_or(received_at),
            }));
        }

        if topic == TOPIC_MESSAGES {
            let raw: RawMessage = serde_json::from_slice(payload).map_err(invalid)?;
            return Ok(Inbound::Message(MessageRecord {
                timestamp: raw.timestamp.unwrap_or(received_at),
                messenger_id: raw.messenger_id.unwrap_or_else(|| UNKNOWN_ID.to_string()),
                message: raw.message.unwrap_or_else(|| EMPTY_MESSAGE.to_string()),
            }));
        }

        let body = serde_json::from_slice(payload).map_err(invalid)?;
        Ok(Inbound::Other {
            topic: topic.to_string(),
            body,
        })
    }
}
