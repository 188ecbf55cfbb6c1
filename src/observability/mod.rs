//! Observability
//!
//! Structured logging for the security substrate. Application code uses
//! standard `tracing` macros; security-relevant events go through
//! [`security_event!`] so every line carries the same `security_event`,
//! `category` and `severity` fields under the `security` target.
//!
//! # Usage
//!
//! ```ignore
//! use eventguard::observability::{ObservabilityConfig, init};
//!
//! init(&ObservabilityConfig::from_env())?;
//! ```

mod config;
mod events;
mod providers;

pub use config::{LogFormat, ObservabilityConfig, ObservabilityConfigBuilder};
pub use events::{security_event, SecurityEvent, Severity};

use tracing::info;

/// Initialize the global tracing subscriber.
///
/// Call once at startup, before any logging occurs.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global
/// subscriber is already installed.
pub fn init(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    providers::init_tracing(config)?;

    info!(log_format = ?config.log_format, "Observability initialized");

    Ok(())
}

/// Observability initialization errors
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    /// Invalid configuration
    #[error("Observability config error: {0}")]
    Config(String),
    /// Subscriber installation failed
    #[error("Provider error: {0}")]
    Provider(String),
}
