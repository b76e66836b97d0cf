//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON or pretty formatting on stderr
//! - Rolling JSON log files with retention cleanup

pub mod logger;

pub use logger::{parse_log_level, prune_old_logs, LoggerImpl, LOG_FILE_NAME};
