use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Installs the global subscriber. `RUST_LOG`, when set, replaces
/// `logging.level`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    // exactly one of these is Some
    let json = (config.format == LogFormat::Json)
        .then(|| fmt::layer().json().with_current_span(true).with_span_list(false));
    let pretty = (config.format == LogFormat::Pretty).then(|| fmt::layer().pretty());
    let compact = (config.format == LogFormat::Compact)
        .then(|| fmt::layer().compact().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .with(compact)
        .try_init()?;

    tracing::debug!("Logging initialized ({:?}, level {})", config.format, config.level);
    Ok(())
}
