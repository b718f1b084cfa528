//! Configuration, file system paths and logging for the upload queue daemon.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, QueueConfig, SenderSettings, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_LOG_LEVEL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogFormat};
pub use paths::Paths;
