//! Logging initialization for the daemon.
//!
//! Logs go to stderr, human-readable by default or as JSON lines when
//! `UPLOAD_QUEUE_LOG_FORMAT=json`. `RUST_LOG` takes precedence over the level
//! passed to [`init_logging`].

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format of the stderr log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// Parse a format name; anything but `json` is pretty.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Pretty,
        }
    }

    fn from_env() -> Self {
        std::env::var("UPLOAD_QUEUE_LOG_FORMAT")
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }
}

/// Initialize the global tracing subscriber.
///
/// Calling it again after a subscriber is installed has no effect.
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("Daemon started");
/// ```
pub fn init_logging(level: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(parse_level(level)).into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);
    let result = match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
