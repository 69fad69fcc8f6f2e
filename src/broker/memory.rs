use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn, Instrument};

use super::{topic_matches, BrokerEvent, Delivery, PublishError, Publisher, EVENT_CHANNEL_SIZE};

/// In-process broker for single-process deployments.
///
/// Every publish is fanned out to all subscriptions whose filters match
/// the topic. A publish with no subscribers is dropped silently, the way
/// a real broker drops messages nobody subscribed to.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<Delivery>,
}

impl MemoryBroker {
    /// `capacity` bounds how far a slow subscription may lag before it
    /// starts losing messages
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Opens a subscription. The returned channel starts with
    /// `BrokerEvent::Connected`, then carries every matching delivery.
    pub fn subscribe(&self, filters: &[&str]) -> mpsc::Receiver<BrokerEvent> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let filters: Vec<String> = filters.iter().map(|f| f.to_string()).collect();
        let mut rx = self.tx.subscribe();

        // Channel is fresh, so this cannot be full
        let _ = event_tx.try_send(BrokerEvent::Connected);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(delivery) => {
                        if !filters.iter().any(|f| topic_matches(f, &delivery.topic)) {
                            continue;
                        }
                        if event_tx.send(BrokerEvent::Message(delivery)).await.is_err() {
                            debug!("Memory subscription dropped");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Memory subscription lagged, {} messages lost", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = event_tx
                            .send(BrokerEvent::Disconnected("broker closed".to_string()))
                            .await;
                        break;
                    }
                }
            }
        }
        .in_current_span());

        event_rx
    }

    /// Publisher plus event stream, the same pair an MQTT link hands out
    pub fn connect(&self, filters: &[&str]) -> (MemoryPublisher, mpsc::Receiver<BrokerEvent>) {
        (self.publisher(), self.subscribe(filters))
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryPublisher {
    tx: broadcast::Sender<Delivery>,
}

impl Publisher for MemoryPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let delivery = Delivery {
            topic: topic.to_string(),
            payload: Bytes::from(payload),
        };
        // Err only means there is no subscriber right now
        let _ = self.tx.send(delivery);
        Ok(())
    }
}
