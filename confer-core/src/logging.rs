use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Initialize structured logging based on configuration
///
/// Supports both JSON (production) and pretty (development) formats
/// with configurable log levels and optional file output. `RUST_LOG`
/// takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.format.as_str() == "json" {
        let json_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_line_number(true)
            .with_file(true);

        if let Some(file_path) = &config.file_path {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            registry
                .with(json_layer.with_writer(std::sync::Arc::new(file)))
                .try_init()?;
        } else {
            registry.with(json_layer).try_init()?;
        }
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_line_number(true)
            .with_file(false);

        if let Some(file_path) = &config.file_path {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            registry
                .with(pretty_layer.with_writer(std::sync::Arc::new(file)))
                .try_init()?;
        } else {
            registry.with(pretty_layer).try_init()?;
        }
    }

    Ok(())
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
