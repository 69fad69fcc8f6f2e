use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info_span, Instrument};

use metricbus::app::{
    init_logging, run_local, run_messenger, run_sensor, run_subscriber, spawn_signal_listener,
    Config, Overrides,
};
use metricbus::MetricKind;

#[derive(Parser)]
#[command(name = "metricbus")]
#[command(author, version, about, long_about = None)]
#[command(about = "Host telemetry over MQTT: sensors, message relay and summarizing subscriber")]
struct Cli {
    /// Config file path
    #[arg(short = 'f', long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Tracing filter (overrides LOG_LEVEL and the config file)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Show config file path
    #[arg(long)]
    show_config_path: bool,

    /// Generate default config file
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Publish one host metric periodically
    Sensor {
        /// Metric to publish (memory or cpu)
        #[arg(long)]
        metric: Option<MetricKind>,

        /// Sensor id
        #[arg(long)]
        id: Option<String>,

        /// Seconds between readings
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// Relay HTTP messages onto the broker
    Messenger {
        /// Messenger id
        #[arg(long)]
        id: Option<String>,

        /// HTTP listen address
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Aggregate and summarize everything on the monitoring topics
    Subscriber {
        /// Subscriber id
        #[arg(long)]
        id: Option<String>,

        /// Seconds between summaries
        #[arg(long, value_name = "SECS")]
        summary_interval: Option<u64>,

        /// HTTP listen address
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Run every node in one process over the in-process broker
    Local,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Show config path and exit
    if cli.show_config_path {
        if let Some(path) = Config::default_path() {
            println!("{}", path.display());
        } else {
            println!("Config directory not found");
        }
        return Ok(());
    }

    // Initialize config file and exit
    if cli.init_config {
        let config = Config::default();
        if let Err(e) = config.save() {
            eprintln!("Failed to create config: {}", e);
            std::process::exit(1);
        }
        if let Some(path) = Config::default_path() {
            println!("Config created: {}", path.display());
        }
        return Ok(());
    }

    let Some(command) = cli.command else {
        eprintln!("No command given, see --help");
        std::process::exit(2);
    };

    let overrides = cli_overrides(cli.log_level, &command);
    let config = Config::resolve(cli.config.as_deref(), |key| std::env::var(key).ok(), &overrides)?;

    init_logging(&config.log_level, cli.log_file.as_deref())?;

    let shutdown = spawn_signal_listener();
    let result = match command {
        Command::Sensor { .. } => {
            let span = info_span!("sensor", id = %config.sensor.id, metric = %config.sensor.metric);
            run_sensor(&config, shutdown).instrument(span).await
        }
        Command::Messenger { .. } => {
            let span = info_span!("messenger", id = %config.messenger.id);
            run_messenger(&config, shutdown).instrument(span).await
        }
        Command::Subscriber { .. } => {
            let span = info_span!("subscriber", id = %config.subscriber.id);
            run_subscriber(&config, shutdown).instrument(span).await
        }
        Command::Local => run_local(&config, shutdown).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn cli_overrides(log_level: Option<String>, command: &Command) -> Overrides {
    let mut overrides = Overrides {
        log_level,
        ..Overrides::default()
    };
    match command {
        Command::Sensor {
            metric,
            id,
            interval,
        } => {
            overrides.sensor_metric = *metric;
            overrides.sensor_id = id.clone();
            overrides.publish_interval_secs = *interval;
        }
        Command::Messenger { id, bind } => {
            overrides.messenger_id = id.clone();
            overrides.messenger_bind = bind.clone();
        }
        Command::Subscriber {
            id,
            summary_interval,
            bind,
        } => {
            overrides.subscriber_id = id.clone();
            overrides.summary_interval_secs = *summary_interval;
            overrides.subscriber_bind = bind.clone();
        }
        Command::Local => {}
    }
    overrides
}
