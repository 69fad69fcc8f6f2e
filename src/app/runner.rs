//! Entry points for each node role.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, info_span, Instrument};

use super::shutdown::wait_for_shutdown;
use super::Config;
use crate::broker::{spawn_event_logger, LinkStatus, MemoryBroker, MqttLink, MqttPublisher, Publisher};
use crate::messenger::{self, MessengerState};
use crate::monitor::{SensorTask, SystemStatsCollector};
use crate::subscriber::{self, SubscriberState, SubscriberTask};
use crate::telemetry::{now_unix, MetricKind, SUBSCRIBER_TOPICS};

/// Time given to the event loop to flush the DISCONNECT packet
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Binds an HTTP listener, failing fast when the address is taken
pub async fn bind_http(bind: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);
    Ok(listener)
}

/// Serves `router` on an already bound listener until shutdown
pub async fn serve_listener(
    listener: TcpListener,
    router: Router,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .context("HTTP server failed")
}

async fn close_link(publisher: MqttPublisher, driver: JoinHandle<()>, extra: Option<JoinHandle<()>>) {
    publisher.disconnect();
    tokio::time::sleep(DISCONNECT_GRACE).await;
    driver.abort();
    if let Some(handle) = extra {
        handle.abort();
    }
    info!("Disconnected from broker");
}

/// Publishes one host metric until shutdown
pub async fn run_sensor(config: &Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let sensor = &config.sensor;
    let client_id = format!("{}_{}", sensor.id, sensor.metric);
    let (publisher, events, driver) =
        MqttLink::connect(&config.broker, &client_id, &[])?.into_parts();
    let logger = spawn_event_logger(events, LinkStatus::new());

    let task = SensorTask::new(
        sensor.id.clone(),
        sensor.metric,
        Box::new(SystemStatsCollector::new()),
        Arc::new(publisher.clone()),
        sensor.publish_interval(),
    );
    task.run(shutdown).await;

    close_link(publisher, driver, Some(logger)).await;
    Ok(())
}

/// Serves the message relay until shutdown
pub async fn run_messenger(config: &Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let messenger = &config.messenger;
    let listener = bind_http(&messenger.bind).await?;
    let (publisher, events, driver) =
        MqttLink::connect(&config.broker, &messenger.id, &[])?.into_parts();
    let link = LinkStatus::new();
    let logger = spawn_event_logger(events, link.clone());

    info!("Starting messaging app");
    let state = MessengerState {
        messenger_id: messenger.id.clone(),
        publisher: Arc::new(publisher.clone()),
        link,
    };
    let result = serve_listener(listener, messenger::router(state), shutdown).await;

    close_link(publisher, driver, Some(logger)).await;
    info!("Messaging app stopped");
    result
}

/// Consumes and summarizes telemetry until shutdown
pub async fn run_subscriber(config: &Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let sub = &config.subscriber;
    let listener = bind_http(&sub.bind).await?;
    let (publisher, events, driver) =
        MqttLink::connect(&config.broker, &sub.id, &SUBSCRIBER_TOPICS)?.into_parts();

    let state = SubscriberState::new(sub.id.clone(), now_unix(), sub.summary_retention).shared();
    let task = SubscriberTask::new(state.clone(), events, sub.summary_interval());
    let task_handle = tokio::spawn(task.run(shutdown.clone()).in_current_span());

    let served = serve_listener(listener, subscriber::router(state), shutdown).await;
    let finished = task_handle.await;

    close_link(publisher, driver, None).await;
    served?;
    finished.context("Subscriber task panicked")?;
    Ok(())
}

/// Runs both sensors, the messenger and the subscriber in this process,
/// connected through the in-process broker
pub async fn run_local(config: &Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let sub = &config.subscriber;
    let messenger_listener = bind_http(&config.messenger.bind).await?;
    let subscriber_listener = bind_http(&sub.bind).await?;

    let broker = MemoryBroker::default();
    let publisher: Arc<dyn Publisher> = Arc::new(broker.publisher());

    let state = SubscriberState::new(sub.id.clone(), now_unix(), sub.summary_retention).shared();
    let subscriber_task = SubscriberTask::new(
        state.clone(),
        broker.subscribe(&SUBSCRIBER_TOPICS),
        sub.summary_interval(),
    );

    let sensor = |kind: MetricKind| {
        SensorTask::new(
            config.sensor.id.clone(),
            kind,
            Box::new(SystemStatsCollector::new()),
            publisher.clone(),
            config.sensor.publish_interval(),
        )
        .run(shutdown.clone())
        .instrument(info_span!("sensor", id = %config.sensor.id, metric = %kind))
    };

    let link = LinkStatus::new();
    link.set(true);
    let messenger_state = MessengerState {
        messenger_id: config.messenger.id.clone(),
        publisher: publisher.clone(),
        link,
    };

    info!("Running all nodes in-process");
    let (_, _, _, messenger_served, subscriber_served) = tokio::join!(
        sensor(MetricKind::Memory),
        sensor(MetricKind::Cpu),
        subscriber_task
            .run(shutdown.clone())
            .instrument(info_span!("subscriber", id = %sub.id)),
        serve_listener(
            messenger_listener,
            messenger::router(messenger_state),
            shutdown.clone()
        )
        .instrument(info_span!("messenger", id = %config.messenger.id)),
        serve_listener(subscriber_listener, subscriber::router(state), shutdown.clone())
            .instrument(info_span!("subscriber", id = %sub.id)),
    );

    messenger_served?;
    subscriber_served?;
    Ok(())
}
