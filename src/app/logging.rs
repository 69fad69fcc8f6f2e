use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::registry::{LookupSpan, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Installs the global tracing subscriber.
///
/// `filter` takes `EnvFilter` directives ("info", "metricbus=debug,tower_http=warn").
/// Output always goes to stdout; with `log_file` set it is also written to
/// that file without ANSI colors.
pub fn init_logging(filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .with_context(|| format!("Invalid log level '{}'", filter))?;
    let file = log_file.map(file_layer::<Registry>).transpose()?;

    tracing_subscriber::registry()
        .with(file)
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}

fn file_layer<S>(path: &Path) -> Result<impl Layer<S>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let file = File::create(path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;
    Ok(tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false))
}
