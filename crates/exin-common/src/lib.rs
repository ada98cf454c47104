//! # Exin Common
//!
//! Logging configuration shared by the Exin offline agent crates.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};
