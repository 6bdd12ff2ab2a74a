//! Structured logging.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Logs go to `log_file` when one is configured, stdout otherwise. Fails only
/// when the log file cannot be opened; returns false when a subscriber was
/// already installed.
pub fn init_logging(config: &ObservabilityConfig) -> std::io::Result<bool> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("net_server={}", config.log_level)));

    let file = config
        .log_file
        .as_ref()
        .map(|path| OpenOptions::new().create(true).append(true).open(path))
        .transpose()?;

    let (stdout_layer, file_layer) = match file {
        Some(file) => (
            None,
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
        ),
        None => (Some(fmt::layer()), None),
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok())
}
