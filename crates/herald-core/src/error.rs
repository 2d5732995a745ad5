//! Error types for Herald core library.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while bootstrapping a Herald process.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tracing initialisation error: {0}")]
    Tracing(String),
}
