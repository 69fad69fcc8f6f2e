use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::telemetry::MetricKind;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Tracing filter (e.g. "info", "metricbus=debug")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub messenger: MessengerConfig,

    #[serde(default)]
    pub subscriber: SubscriberConfig,
}

/// Connection settings for the MQTT broker
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Host name or URL (`host`, `host:port`, `mqtts://host:port`)
    #[serde(default = "default_broker_url")]
    pub url: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub tls: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// First reconnect delay after a connection error
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,

    /// Upper bound for the reconnect delay
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_sensor_id")]
    pub id: String,

    #[serde(default = "default_metric")]
    pub metric: MetricKind,

    /// Seconds between two published samples
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessengerConfig {
    #[serde(default = "default_messenger_id")]
    pub id: String,

    #[serde(default = "default_messenger_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    #[serde(default = "default_subscriber_id")]
    pub id: String,

    /// Seconds between two summary windows
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,

    /// Number of closed windows kept for the snapshot API
    #[serde(default = "default_summary_retention")]
    pub summary_retention: usize,

    #[serde(default = "default_subscriber_bind")]
    pub bind: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_broker_url() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    8883
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> u64 {
    60
}

fn default_reconnect_initial() -> u64 {
    500
}

fn default_reconnect_max() -> u64 {
    30_000
}

fn default_sensor_id() -> String {
    "sensor-001".to_string()
}

fn default_metric() -> MetricKind {
    MetricKind::Memory
}

fn default_publish_interval() -> u64 {
    5
}

fn default_messenger_id() -> String {
    "messenger-001".to_string()
}

fn default_messenger_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_subscriber_id() -> String {
    "monitoring-subscriber-001".to_string()
}

fn default_summary_interval() -> u64 {
    120
}

fn default_summary_retention() -> usize {
    24
}

fn default_subscriber_bind() -> String {
    "0.0.0.0:8501".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            broker: BrokerConfig::default(),
            sensor: SensorConfig::default(),
            messenger: MessengerConfig::default(),
            subscriber: SubscriberConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            port: default_broker_port(),
            tls: true,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("url", &self.url)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("reconnect_initial_ms", &self.reconnect_initial_ms)
            .field("reconnect_max_ms", &self.reconnect_max_ms)
            .finish()
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            id: default_sensor_id(),
            metric: default_metric(),
            publish_interval_secs: default_publish_interval(),
        }
    }
}

impl SensorConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            id: default_messenger_id(),
            bind: default_messenger_bind(),
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            id: default_subscriber_id(),
            summary_interval_secs: default_summary_interval(),
            summary_retention: default_summary_retention(),
            bind: default_subscriber_bind(),
        }
    }
}

impl SubscriberConfig {
    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }
}

/// Values given on the command line. `None` keeps the layered value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub sensor_metric: Option<MetricKind>,
    pub sensor_id: Option<String>,
    pub publish_interval_secs: Option<u64>,
    pub messenger_id: Option<String>,
    pub messenger_bind: Option<String>,
    pub subscriber_id: Option<String>,
    pub summary_interval_secs: Option<u64>,
    pub subscriber_bind: Option<String>,
}

/// Invalid values found while layering environment variables or validating
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var} must be true or false, got '{value}'")]
    InvalidBool { var: &'static str, value: String },
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl Config {
    /// Returns the default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("metricbus").join("config.toml"))
    }

    /// Loads config from the default path, or defaults when there is no
    /// file there. A file that exists but does not parse is an error.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    /// Loads `path` if it exists, otherwise returns defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Saves config to the default path
    pub fn save(&self) -> Result<()> {
        if let Some(path) = Self::default_path() {
            self.save_to(&path)?;
        }
        Ok(())
    }

    /// Saves config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Applies variables resolved by `lookup`. Unset and empty variables
    /// leave the current value untouched.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }

        if let Some(v) = get("SENSOR_ID") {
            self.sensor.id = v;
        }
        if let Some(v) = get("SENSOR_METRIC") {
            self.sensor.metric = v.parse().map_err(|e: crate::telemetry::UnknownMetric| {
                ConfigError::Invalid {
                    var: "SENSOR_METRIC",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(v) = get("PUBLISH_INTERVAL") {
            self.sensor.publish_interval_secs = parse_secs("PUBLISH_INTERVAL", &v)?;
        }

        if let Some(v) = get("MESSENGER_ID") {
            self.messenger.id = v;
        }

        if let Some(v) = get("SUBSCRIBER_ID") {
            self.subscriber.id = v;
        }
        if let Some(v) = get("SUMMARY_INTERVAL") {
            self.subscriber.summary_interval_secs = parse_secs("SUMMARY_INTERVAL", &v)?;
        }

        if let Some(v) = get("MQTT_CLUSTER_URL") {
            self.broker.url = v;
        }
        if let Some(v) = get("MQTT_PORT") {
            self.broker.port = v.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                var: "MQTT_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("MQTT_TLS") {
            self.broker.tls = parse_bool("MQTT_TLS", &v)?;
        }
        if let Some(v) = get("MQTT_USERNAME") {
            self.broker.username = Some(v);
        }
        if let Some(v) = get("MQTT_PASSWORD") {
            self.broker.password = Some(v);
        }

        Ok(())
    }

    /// Applies command line values on top of everything else
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
        if let Some(metric) = overrides.sensor_metric {
            self.sensor.metric = metric;
        }
        if let Some(id) = &overrides.sensor_id {
            self.sensor.id = id.clone();
        }
        if let Some(secs) = overrides.publish_interval_secs {
            self.sensor.publish_interval_secs = secs;
        }
        if let Some(id) = &overrides.messenger_id {
            self.messenger.id = id.clone();
        }
        if let Some(bind) = &overrides.messenger_bind {
            self.messenger.bind = bind.clone();
        }
        if let Some(id) = &overrides.subscriber_id {
            self.subscriber.id = id.clone();
        }
        if let Some(secs) = overrides.summary_interval_secs {
            self.subscriber.summary_interval_secs = secs;
        }
        if let Some(bind) = &overrides.subscriber_bind {
            self.subscriber.bind = bind.clone();
        }
    }

    /// Resolves the effective config: defaults, then the config file
    /// (`file`, or the default path), then the environment from `lookup`,
    /// then `overrides`. The result is validated.
    pub fn resolve<F>(file: Option<&Path>, lookup: F, overrides: &Overrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_from(lookup).context("Invalid environment")?;
        config.apply_overrides(overrides);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Rejects values no node can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor.publish_interval_secs == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "PUBLISH_INTERVAL",
                value: "0".to_string(),
            });
        }
        if self.subscriber.summary_interval_secs == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "SUMMARY_INTERVAL",
                value: "0".to_string(),
            });
        }
        if self.subscriber.summary_retention == 0 {
            return Err(ConfigError::Invalid {
                var: "summary_retention",
                reason: "must keep at least one window".to_string(),
            });
        }
        if self.broker.url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "MQTT_CLUSTER_URL",
                reason: "broker url is empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sensor.publish_interval_secs, 5);
        assert_eq!(config.subscriber.summary_interval_secs, 120);
        assert_eq!(config.subscriber.id, "monitoring-subscriber-001");
        assert_eq!(config.broker.port, 8883);
        assert!(config.broker.tls);
        assert_eq!(config.messenger.bind, "0.0.0.0:8080");
        assert_eq!(config.subscriber.bind, "0.0.0.0:8501");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [sensor]
            metric = "cpu"

            [broker]
            url = "broker.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.sensor.metric, MetricKind::Cpu);
        assert_eq!(parsed.sensor.publish_interval_secs, 5);
        assert_eq!(parsed.broker.url, "broker.example.com");
        assert_eq!(parsed.broker.port, 8883);
        assert_eq!(parsed.log_level, "info");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.messenger.id = "relay-7".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.messenger.id, "relay-7");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("SENSOR_ID", "edge-1"),
                ("SENSOR_METRIC", "cpu"),
                ("PUBLISH_INTERVAL", "10"),
                ("SUBSCRIBER_ID", "sub-9"),
                ("SUMMARY_INTERVAL", "30"),
                ("MQTT_CLUSTER_URL", "abc.hivemq.cloud"),
                ("MQTT_TLS", "false"),
                ("MQTT_USERNAME", "user"),
                ("MQTT_PASSWORD", "secret"),
                ("LOG_LEVEL", "DEBUG"),
            ]))
            .unwrap();

        assert_eq!(config.sensor.id, "edge-1");
        assert_eq!(config.sensor.metric, MetricKind::Cpu);
        assert_eq!(config.sensor.publish_interval(), Duration::from_secs(10));
        assert_eq!(config.subscriber.id, "sub-9");
        assert_eq!(config.subscriber.summary_interval(), Duration::from_secs(30));
        assert_eq!(config.broker.url, "abc.hivemq.cloud");
        assert!(!config.broker.tls);
        assert_eq!(config.broker.password.as_deref(), Some("secret"));
        assert_eq!(config.log_level, "debug");
        // Untouched sections keep their defaults
        assert_eq!(config.messenger.id, "messenger-001");
    }

    #[test]
    fn test_env_rejects_bad_interval() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(env(&[("PUBLISH_INTERVAL", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: "PUBLISH_INTERVAL",
                value: "soon".to_string()
            }
        );

        let err = config
            .apply_env_from(env(&[("SUMMARY_INTERVAL", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { var: "SUMMARY_INTERVAL", .. }));
    }

    #[test]
    fn test_empty_env_is_ignored() {
        let mut config = Config::default();
        config.apply_env_from(env(&[("SENSOR_ID", "  ")])).unwrap();
        assert_eq!(config.sensor.id, "sensor-001");
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.subscriber.summary_retention = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let mut broker = BrokerConfig::default();
        broker.password = Some("hunter2".to_string());
        let rendered = format!("{:?}", broker);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[broker\nport = \"eighty\"").unwrap();

        let err = Config::load_or_default(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }

    #[test]
    fn test_resolve_layers_file_env_then_cli() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [sensor]
            id = "file-sensor"
            publish_interval_secs = 7

            [messenger]
            id = "file-relay"
            "#,
        )
        .unwrap();

        let overrides = Overrides {
            publish_interval_secs: Some(11),
            subscriber_bind: Some("127.0.0.1:9501".to_string()),
            ..Overrides::default()
        };
        let config = Config::resolve(
            Some(&path),
            env(&[("SENSOR_ID", "env-sensor"), ("PUBLISH_INTERVAL", "9")]),
            &overrides,
        )
        .unwrap();

        // CLI beats env beats file beats defaults
        assert_eq!(config.sensor.publish_interval_secs, 11);
        assert_eq!(config.sensor.id, "env-sensor");
        assert_eq!(config.messenger.id, "file-relay");
        assert_eq!(config.subscriber.bind, "127.0.0.1:9501");
        assert_eq!(config.subscriber.id, "monitoring-subscriber-001");
    }

    #[test]
    fn test_resolve_validates_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let overrides = Overrides {
            summary_interval_secs: Some(0),
            ..Overrides::default()
        };
        let err = Config::resolve(Some(&path), env(&[]), &overrides).unwrap_err();
        assert!(format!("{:#}", err).contains("SUMMARY_INTERVAL"));
    }

    #[test]
    fn test_resolve_reports_bad_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let err = Config::resolve(Some(&path), env(&[("MQTT_TLS", "maybe")]), &Overrides::default())
            .unwrap_err();
        assert!(format!("{:#}", err).contains("MQTT_TLS"));
    }
}
