//! # Realm Telemetry
//!
//! Logging setup shared by realm-bus hosts.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realm_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::for_realm("background"))?;
//!     // Bus events are now logged
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `REALM_SERVICE_NAME` | `realm-bus` | Service name on every line |
//! | `REALM_LOG_LEVEL` / `RUST_LOG` | `info` | `EnvFilter` directive |
//! | `REALM_CONSOLE_OUTPUT` | `true` | Write logs to the console |
//! | `REALM_JSON_LOGS` | `false` | JSON formatted logs |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging, LoggingHandle};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging for a realm host.
///
/// Returns a guard to hold for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let logging = init_logging(&config)?;
    Ok(TelemetryGuard { logging })
}

/// Guard that keeps telemetry active.
#[derive(Debug)]
pub struct TelemetryGuard {
    logging: LoggingHandle,
}

impl TelemetryGuard {
    /// Service name logs are emitted under.
    pub fn service(&self) -> &str {
        self.logging.service()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.logging.service(), "Shutting down telemetry");
    }
}

/// Span tagged with the realm it runs in.
///
/// ```rust,ignore
/// let _span = realm_span!("relay", realm = "contentscript", topic = "eth_call").entered();
/// ```
#[macro_export]
macro_rules! realm_span {
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}
