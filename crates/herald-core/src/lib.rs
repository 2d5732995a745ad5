//! Herald Core Library
//!
//! Shared functionality for Herald components:
//! - SQLite pool creation and timestamps
//! - Configuration resolution (defaults, config file, environment)
//! - Dotted-numeric release version comparison
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;
pub mod version;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use version::ReleaseVersion;
