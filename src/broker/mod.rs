//! Publish/subscribe plumbing.
//!
//! Nodes talk to the bus through a [`Publisher`] for outbound traffic and
//! an `mpsc::Receiver<BrokerEvent>` for everything coming back. The MQTT
//! link and the in-process broker both produce that pair, so sensors,
//! messenger and subscriber never know which one they run on.

mod backoff;
mod endpoint;
mod memory;
mod mqtt;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

pub use backoff::BackoffController;
pub use endpoint::BrokerEndpoint;
pub use memory::{MemoryBroker, MemoryPublisher};
pub use mqtt::{MqttLink, MqttPublisher};

/// Depth of the event channel handed to each node
pub const EVENT_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broker link rejected publish: {0}")]
    Rejected(String),
}

/// Outbound side of a broker connection.
///
/// `publish` never waits on the network: the message is queued for the
/// link or rejected straight away.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Serializes `value` as JSON and publishes it on `topic`
pub fn publish_json<T: Serialize + ?Sized>(
    publisher: &dyn Publisher,
    topic: &str,
    value: &T,
) -> Result<(), PublishError> {
    let payload = serde_json::to_vec(value)?;
    publisher.publish(topic, payload)
}

/// A message received from the bus
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
}

/// Everything a node can learn from its broker link
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Connected,
    Disconnected(String),
    Message(Delivery),
}

/// Shared view of whether a link is currently connected
#[derive(Debug, Clone, Default)]
pub struct LinkStatus(Arc<AtomicBool>);

impl LinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Drains events for nodes that only publish, logging connection changes.
/// The task logs inside the caller's span.
pub fn spawn_event_logger(mut events: mpsc::Receiver<BrokerEvent>, status: LinkStatus) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                BrokerEvent::Connected => {
                    status.set(true);
                    info!("Connected to broker");
                }
                BrokerEvent::Disconnected(reason) => {
                    status.set(false);
                    warn!("Unexpected broker disconnection: {}", reason);
                }
                BrokerEvent::Message(delivery) => {
                    debug!(
                        "{} {}",
                        delivery.topic,
                        String::from_utf8_lossy(&delivery.payload)
                    );
                }
            }
        }
        status.set(false);
        debug!("Broker event channel closed");
    }
    .in_current_span())
}

/// MQTT topic filter matching (`+` one level, `#` trailing levels)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
