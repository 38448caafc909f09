//! Tracing subscriber setup.
//!
//! Events go to stderr so stdout carries only the JSON response envelope.
//! `RUST_LOG` overrides the configured level when set.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Error, Result};

/// Build the filter: `RUST_LOG` first, then the configured directive.
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| {
        Error::config_invalid_value("logging.level", Some(config.level.clone()), e.to_string())
    })
}

/// Install the global subscriber. Calling it twice is harmless; the second
/// install is ignored.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = filter(config)?;

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .with_target(false)
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    if tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
