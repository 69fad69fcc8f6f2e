mod config;
mod logging;
mod runner;
mod shutdown;

pub use config::{
    BrokerConfig, Config, ConfigError, MessengerConfig, Overrides, SensorConfig, SubscriberConfig,
};
pub use logging::init_logging;
pub use runner::{bind_http, run_local, run_messenger, run_sensor, run_subscriber, serve_listener};
pub use shutdown::{shutdown_signal, spawn_signal_listener, wait_for_shutdown};
