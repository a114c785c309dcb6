//! Telemetry configuration from environment variables.

use std::env;

/// Logging settings for one realm host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Realm the process hosts, when it hosts a single one
    pub realm: Option<String>,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive
    pub log_level: String,

    /// Whether to write logs to the console
    pub console_output: bool,

    /// Whether to format logs as JSON
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "realm-bus".to_string(),
            realm: None,
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REALM_SERVICE_NAME`: Service name (default: realm-bus)
    /// - `REALM_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `REALM_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `REALM_JSON_LOGS`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            service_name: lookup("REALM_SERVICE_NAME").unwrap_or_else(|| "realm-bus".to_string()),

            realm: None,

            log_level: lookup("REALM_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),

            console_output: lookup("REALM_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: lookup("REALM_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Create configuration for a process hosting one realm.
    pub fn for_realm(realm: &str) -> Self {
        let mut config = Self::from_env();
        config.realm = Some(realm.to_string());
        config
    }

    /// Service name including the realm, e.g. `realm-bus-popup`.
    pub fn full_service_name(&self) -> String {
        match &self.realm {
            Some(realm) => format!("{}-{}", self.service_name, realm),
            None => self.service_name.clone(),
        }
    }
}
