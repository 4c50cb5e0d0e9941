use std::fs::OpenOptions;
use std::sync::Mutex;

use sqx_metadata::{LogFormat, LoggerConfig};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::error::FeedError;

/// Configured level unless RUST_LOG is set. The configured level is
/// validated either way.
pub fn build_filter(level: &str) -> Result<EnvFilter, FeedError> {
    let level: LevelFilter = level
        .trim()
        .parse()
        .map_err(|_| FeedError::Logging(format!("invalid log level {:?}", level)))?;
    Ok(EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into())))
}

/// Install the global subscriber from the `logger` section
pub fn init(config: &LoggerConfig) -> Result<(), FeedError> {
    let filter = build_filter(&config.level)?;
    let writer = match &config.path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| FeedError::Logging(format!("{}: {}", path.display(), e)))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.with_ansi(config.path.is_none()).try_init(),
    };
    installed.map_err(|e| FeedError::Logging(e.to_string()))
}
