use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::MetricSource;
use crate::broker::{publish_json, PublishError, Publisher};
use crate::telemetry::{MetricKind, MetricSample, SampleClock};

/// Percent reading rounded to one decimal, so `12.3f32` goes out as `12.3`
fn to_tenths(value: f32) -> f64 {
    (f64::from(value) * 10.0).round() / 10.0
}

/// Periodic publisher for one metric of one sensor
pub struct SensorTask {
    sensor_id: String,
    kind: MetricKind,
    source: Box<dyn MetricSource>,
    publisher: Arc<dyn Publisher>,
    interval: Duration,
    clock: SampleClock,
}

impl SensorTask {
    pub fn new(
        sensor_id: String,
        kind: MetricKind,
        source: Box<dyn MetricSource>,
        publisher: Arc<dyn Publisher>,
        interval: Duration,
    ) -> Self {
        Self {
            sensor_id,
            kind,
            source,
            publisher,
            interval,
            clock: SampleClock::new(),
        }
    }

    /// Takes one reading and publishes it. The sample is returned even when
    /// it could not be handed to the broker.
    pub fn publish_once(&mut self) -> (MetricSample, Result<(), PublishError>) {
        let value = to_tenths(self.source.sample(self.kind));
        match self.kind {
            MetricKind::Memory => info!("System RAM: {:.1}%", value),
            MetricKind::Cpu => info!("CPU usage: {:.1}%", value),
        }

        let sample = MetricSample {
            sensor_id: self.sensor_id.clone(),
            kind: self.kind,
            value,
            timestamp: self.clock.stamp(),
        };
        let result = publish_json(self.publisher.as_ref(), sample.topic(), &sample);
        (sample, result)
    }

    /// Runs the publish loop: one sample once the source is warmed up, then
    /// one per interval until `shutdown` flips to true or its sender is
    /// dropped. Failed publishes are logged and the loop carries on.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting {} monitoring every {:?}", self.kind, self.interval);

        let warm_up = self.source.warm_up(self.kind);
        if !warm_up.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(warm_up) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("{} sensor stopped", self.kind);
                        return;
                    }
                }
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (sample, result) = self.publish_once();
                    match result {
                        Ok(()) => debug!("Published {} sample at {:.3}", sample.kind, sample.timestamp),
                        Err(e) => error!("Failed to publish {} data: {}", self.kind, e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("{} sensor stopped", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerEvent, MemoryBroker, PublishError};
    use tokio::sync::mpsc;

    /// Source returning a scripted sequence of values
    struct Scripted(Vec<f32>);

    impl MetricSource for Scripted {
        fn sample(&mut self, _kind: MetricKind) -> f32 {
            if self.0.len() > 1 {
                self.0.remove(0)
            } else {
                self.0[0]
            }
        }
    }

    /// Source that needs time before its first reading
    struct Warming(Duration);

    impl MetricSource for Warming {
        fn sample(&mut self, _kind: MetricKind) -> f32 {
            55.0
        }

        fn warm_up(&self, _kind: MetricKind) -> Duration {
            self.0
        }
    }

    struct Refusing;

    /// Rejects the first `failures` publishes, then forwards
    struct Flaky {
        failures: std::sync::atomic::AtomicUsize,
        inner: crate::broker::MemoryPublisher,
    }

    impl Publisher for Flaky {
        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
            use std::sync::atomic::Ordering;
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(PublishError::Rejected("queue full".to_string()));
            }
            self.inner.publish(topic, payload)
        }
    }

    impl Publisher for Refusing {
        fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), PublishError> {
            Err(PublishError::Rejected("queue full".to_string()))
        }
    }

    async fn next_json(rx: &mut mpsc::Receiver<BrokerEvent>) -> (String, serde_json::Value) {
        loop {
            if let Some(BrokerEvent::Message(d)) = rx.recv().await {
                return (d.topic, serde_json::from_slice(&d.payload).unwrap());
            }
        }
    }

    #[tokio::test]
    async fn test_publish_once_memory() {
        let broker = MemoryBroker::default();
        let mut rx = broker.subscribe(&["monitoring/#"]);
        let mut task = SensorTask::new(
            "sensor-a".to_string(),
            MetricKind::Memory,
            Box::new(Scripted(vec![42.5])),
            Arc::new(broker.publisher()),
            Duration::from_secs(5),
        );

        let (sample, result) = task.publish_once();
        assert!(result.is_ok());
        assert_eq!(sample.value, 42.5);

        let (topic, json) = next_json(&mut rx).await;
        assert_eq!(topic, "monitoring/memory");
        assert_eq!(json["sensor_id"], "sensor-a");
        assert_eq!(json["system_memory"], 42.5);
    }

    #[tokio::test]
    async fn test_timestamps_non_decreasing() {
        let broker = MemoryBroker::default();
        let mut task = SensorTask::new(
            "sensor-a".to_string(),
            MetricKind::Cpu,
            Box::new(Scripted(vec![1.0, 2.0, 3.0])),
            Arc::new(broker.publisher()),
            Duration::from_secs(1),
        );
        let mut last = 0.0;
        for _ in 0..3 {
            let (sample, _) = task.publish_once();
            assert!(sample.timestamp >= last);
            last = sample.timestamp;
        }
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let mut task = SensorTask::new(
            "sensor-a".to_string(),
            MetricKind::Cpu,
            Box::new(Scripted(vec![7.0])),
            Arc::new(Refusing),
            Duration::from_secs(1),
        );
        let (sample, result) = task.publish_once();
        assert_eq!(sample.value, 7.0);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_each_interval_until_shutdown() {
        let broker = MemoryBroker::default();
        let mut rx = broker.subscribe(&["monitoring/cpu"]);
        let task = SensorTask::new(
            "sensor-b".to_string(),
            MetricKind::Cpu,
            Box::new(Scripted(vec![10.0, 20.0, 30.0])),
            Arc::new(broker.publisher()),
            Duration::from_secs(5),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(stop_rx));

        let mut values = Vec::new();
        for _ in 0..3 {
            let (_, json) = next_json(&mut rx).await;
            values.push(json["cpu_percent"].as_f64().unwrap());
        }
        assert_eq!(values, vec![10.0, 20.0, 30.0]);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_publish_failures() {
        let broker = MemoryBroker::default();
        let mut rx = broker.subscribe(&["monitoring/cpu"]);
        let publisher = Flaky {
            failures: std::sync::atomic::AtomicUsize::new(2),
            inner: broker.publisher(),
        };
        let task = SensorTask::new(
            "sensor-c".to_string(),
            MetricKind::Cpu,
            Box::new(Scripted(vec![1.0, 2.0, 3.0, 4.0])),
            Arc::new(publisher),
            Duration::from_secs(5),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(stop_rx));

        // The first two ticks are rejected, later ticks still go out
        let (_, first) = next_json(&mut rx).await;
        let (_, second) = next_json(&mut rx).await;
        assert_eq!(first["cpu_percent"], 3.0);
        assert_eq!(second["cpu_percent"], 4.0);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reading_rounded_to_tenths() {
        let broker = MemoryBroker::default();
        let mut rx = broker.subscribe(&["monitoring/cpu"]);
        let mut task = SensorTask::new(
            "sensor-a".to_string(),
            MetricKind::Cpu,
            Box::new(Scripted(vec![12.3])),
            Arc::new(broker.publisher()),
            Duration::from_secs(5),
        );

        let (sample, _) = task.publish_once();
        assert_eq!(sample.value, 12.3);
        let (_, json) = next_json(&mut rx).await;
        assert_eq!(json["cpu_percent"].to_string(), "12.3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sample_waits_for_warm_up() {
        let broker = MemoryBroker::default();
        let mut rx = broker.subscribe(&["monitoring/cpu"]);
        assert_eq!(rx.recv().await, Some(BrokerEvent::Connected));
        let task = SensorTask::new(
            "sensor-d".to_string(),
            MetricKind::Cpu,
            Box::new(Warming(Duration::from_secs(1))),
            Arc::new(broker.publisher()),
            Duration::from_secs(5),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());

        let (_, json) = next_json(&mut rx).await;
        assert_eq!(json["cpu_percent"], 55.0);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_warm_up() {
        let broker = MemoryBroker::default();
        let mut rx = broker.subscribe(&["monitoring/cpu"]);
        let task = SensorTask::new(
            "sensor-e".to_string(),
            MetricKind::Cpu,
            Box::new(Warming(Duration::from_secs(60))),
            Arc::new(broker.publisher()),
            Duration::from_secs(5),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(stop_rx));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(rx.recv().await, Some(BrokerEvent::Connected));
        assert!(rx.try_recv().is_err());
    }
}
