use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::report::summary_lines;
use super::store::Ingested;
use super::SharedState;
use crate::broker::{BrokerEvent, Delivery};
use crate::telemetry::{now_unix, readable_time, MetricKind};

/// Consumes broker events and emits a summary every interval
pub struct SubscriberTask {
    state: SharedState,
    events: mpsc::Receiver<BrokerEvent>,
    summary_interval: Duration,
}

impl SubscriberTask {
    pub fn new(
        state: SharedState,
        events: mpsc::Receiver<BrokerEvent>,
        summary_interval: Duration,
    ) -> Self {
        Self {
            state,
            events,
            summary_interval,
        }
    }

    /// Runs until `shutdown` fires, then logs a final summary
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Subscriber started - listening for sensor data...");

        // First summary after one full interval
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.summary_interval,
            self.summary_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                event = self.events.recv(), if events_open => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => {
                            events_open = false;
                            self.state.write().await.store.set_connected(false);
                            warn!("Broker event stream ended");
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.summarize().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.summarize().await;
        info!("Subscriber stopped");
    }

    /// Applies one broker event to the shared state
    pub async fn handle(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connected => {
                self.state.write().await.store.set_connected(true);
                info!("Connected to broker successfully");
            }
            BrokerEvent::Disconnected(reason) => {
                let message = format!("Unexpected broker disconnection: {}", reason);
                warn!("{}", message);
                let mut state = self.state.write().await;
                state.store.set_connected(false);
                state.store.record_error(message, now_unix());
            }
            BrokerEvent::Message(delivery) => self.handle_delivery(delivery).await,
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let received_at = now_unix();
        let mut state = self.state.write().await;
        let result = state
            .store
            .ingest(&delivery.topic, &delivery.payload, received_at);

        match result {
            Ok(Ingested::Metric { sample, stale }) => {
                state.windows.add_sample(&sample);
                drop(state);
                let label = match sample.kind {
                    MetricKind::Memory => "MEMORY",
                    MetricKind::Cpu => "CPU",
                };
                info!(
                    "{} | {} | {:.1}% | {}{}",
                    label,
                    sample.sensor_id,
                    sample.value,
                    readable_time(sample.timestamp),
                    if stale { " (out of order)" } else { "" }
                );
            }
            Ok(Ingested::Duplicate(sample)) => {
                debug!(
                    "Dropped redelivered {} sample from {} at {:.3}",
                    sample.kind, sample.sensor_id, sample.timestamp
                );
            }
            Ok(Ingested::Message(record)) => {
                state.windows.add_message();
                drop(state);
                info!("MESSAGE | {} | {}", record.messenger_id, record.message);
            }
            Ok(Ingested::Other { topic, body }) => {
                info!("Received from {}: {}", topic, body);
            }
            Err(e) => {
                error!("{}", e);
            }
        }
    }

    /// Closes the current window and logs the summary
    pub async fn summarize(&self) {
        let lines = {
            let mut state = self.state.write().await;
            let window = state.windows.close(now_unix());
            summary_lines(&state.store, &window)
        };
        for line in lines {
            info!("{}", line);
        }
    }
}
