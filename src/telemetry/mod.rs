//! Samples and messages as they travel over the bus.

mod clock;

pub use clock::{now_unix, readable_time, SampleClock};
pub use metricbus_types::{
    DecodeError, Inbound, MessageRecord, MetricKind, MetricSample, UnknownMetric,
    SUBSCRIBER_TOPICS, TOPIC_CPU, TOPIC_MEMORY, TOPIC_MESSAGES,
};
