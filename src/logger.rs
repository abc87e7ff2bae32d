use tracing_subscriber::{
    fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Debug, Clone, Default)]
pub struct LoggerConfig {
    pub debug: bool,
    /// Emit one JSON object per event instead of human readable lines.
    pub json: bool,
}

/// Installs the global subscriber. `RUST_LOG` overrides the level chosen by
/// `debug`.
pub fn init_logger(config: LoggerConfig) -> anyhow::Result<()> {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (text, json) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(ChronoUtc::rfc_3339());
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_timer(ChronoUtc::rfc_3339());
        (Some(layer), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()?;

    Ok(())
}
