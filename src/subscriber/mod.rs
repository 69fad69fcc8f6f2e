//! Consumes the monitoring topics, aggregates them into summary windows
//! and serves the aggregated view as JSON.

mod http;
mod report;
mod store;
mod task;
mod window;

use std::sync::Arc;

use tokio::sync::RwLock;

pub use http::{router, SubscriberHealth};
pub use report::{summary_lines, LoadLevel};
pub use store::{
    DataPoint, ErrorEntry, Ingested, MessageCounts, Reading, Snapshot, Statistics, TelemetryStore,
};
pub use task::SubscriberTask;
pub use window::{MetricStats, SeriesSummary, SummaryWindow, WindowAggregator};

/// Subscriber state shared between the consuming task and the HTTP routes
#[derive(Debug)]
pub struct SubscriberState {
    pub store: TelemetryStore,
    pub windows: WindowAggregator,
}

impl SubscriberState {
    pub fn new(subscriber_id: String, started_at: f64, retention: usize) -> Self {
        Self {
            store: TelemetryStore::new(),
            windows: WindowAggregator::new(subscriber_id, started_at, retention),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }
}

pub type SharedState = Arc<RwLock<SubscriberState>>;
