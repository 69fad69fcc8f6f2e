use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::{
    BackoffController, BrokerEndpoint, BrokerEvent, Delivery, PublishError, Publisher,
    EVENT_CHANNEL_SIZE,
};
use crate::app::BrokerConfig;

/// Pending requests (publish/subscribe) queued for the event loop
const REQUEST_CHANNEL_SIZE: usize = 64;

/// Shortest keep-alive the link will negotiate
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Connection to an MQTT broker.
///
/// The event loop runs on its own task: it reconnects with exponential
/// backoff after errors and re-subscribes to every topic on each CONNACK,
/// so subscriptions survive clean-session reconnects.
pub struct MqttLink {
    publisher: MqttPublisher,
    events: mpsc::Receiver<BrokerEvent>,
    driver: JoinHandle<()>,
}

impl MqttLink {
    /// Starts connecting in the background and returns immediately
    pub fn connect(config: &BrokerConfig, client_id: &str, topics: &[&str]) -> Result<Self> {
        let endpoint = BrokerEndpoint::parse(&config.url, config.port)
            .with_context(|| format!("Invalid broker url '{}'", config.url))?;
        let tls = endpoint.tls_hint.unwrap_or(config.tls);

        let mut options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(Duration::from_secs(
            config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));
        options.set_clean_session(true);
        match (&config.username, &config.password) {
            (Some(user), Some(pass)) => {
                options.set_credentials(user.clone(), pass.clone());
            }
            (Some(_), None) | (None, Some(_)) => {
                warn!("Broker credentials incomplete, connecting anonymously");
            }
            (None, None) => {}
        }
        if tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        info!(
            "Connecting to broker {}:{} as {} (tls: {})",
            endpoint.host, endpoint.port, client_id, tls
        );

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_SIZE);
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let backoff = BackoffController::new(config.reconnect_initial_ms, config.reconnect_max_ms);
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();

        let driver = tokio::spawn(
            drive(eventloop, client.clone(), topics, event_tx, backoff).in_current_span(),
        );

        Ok(Self {
            publisher: MqttPublisher { client },
            events,
            driver,
        })
    }

    /// Splits the link into its publisher, event stream and driver task
    pub fn into_parts(self) -> (MqttPublisher, mpsc::Receiver<BrokerEvent>, JoinHandle<()>) {
        (self.publisher, self.events, self.driver)
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    events: mpsc::Sender<BrokerEvent>,
    mut backoff: BackoffController,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                backoff.mark_success();
                info!("CONNACK received with code {:?}", ack.code);
                for topic in &topics {
                    match client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        Ok(()) => info!("Subscribed to {} with QoS 1", topic),
                        Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
                    }
                }
                if events.send(BrokerEvent::Connected).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let delivery = Delivery {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                };
                if events.send(BrokerEvent::Message(delivery)).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(
                    "Subscription confirmed - pkid: {}, codes: {:?}",
                    ack.pkid, ack.return_codes
                );
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!("Publish acknowledged - pkid: {}", ack.pkid);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("Disconnected from broker");
            }
            Ok(_) => {}
            Err(e) => {
                let delay = backoff.mark_failure();
                warn!("Broker connection error: {}; retrying in {:?}", e, delay);
                if events
                    .send(BrokerEvent::Disconnected(e.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
    debug!("Broker event loop stopped");
}

/// Publishing half of an [`MqttLink`]
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Queues a DISCONNECT for the broker
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect not sent: {}", e);
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| PublishError::Rejected(e.to_string()))
    }
}
