pub mod app;
pub mod broker;
pub mod messenger;
pub mod monitor;
pub mod subscriber;
pub mod telemetry;

pub use app::Config;
pub use telemetry::{MetricKind, MetricSample};
