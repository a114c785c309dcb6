//! Bus configuration from TOML or environment variables.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::BusError;
use crate::INVALID_ORIGIN;

/// Per-realm bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// URL prefixes of pages content scripts run in. Only these pages become
    /// the scoped transport's target.
    pub eligible_page_prefixes: Vec<String>,

    /// Error text answered to requests failing origin validation.
    pub invalid_origin_message: String,

    /// Whether the content script installs the bridge relay.
    pub install_relay: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            eligible_page_prefixes: vec!["http".to_string()],
            invalid_origin_message: INVALID_ORIGIN.to_string(),
            install_relay: true,
        }
    }
}

impl BusConfig {
    /// Parse and validate a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, BusError> {
        let config: Self =
            toml::from_str(source).map_err(|e| BusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REALM_BUS_PAGE_PREFIXES`: comma separated URL prefixes (default: http)
    /// - `REALM_BUS_INVALID_ORIGIN_MESSAGE`: origin rejection text (default: Invalid origin)
    /// - `REALM_BUS_INSTALL_RELAY`: install the content-script relay (default: true)
    pub fn from_env() -> Result<Self, BusError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BusError> {
        let defaults = Self::default();
        let config = Self {
            eligible_page_prefixes: lookup("REALM_BUS_PAGE_PREFIXES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|prefix| !prefix.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.eligible_page_prefixes),

            invalid_origin_message: lookup("REALM_BUS_INVALID_ORIGIN_MESSAGE")
                .unwrap_or(defaults.invalid_origin_message),

            install_relay: lookup("REALM_BUS_INSTALL_RELAY")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(defaults.install_relay),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the bus cannot work with.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.eligible_page_prefixes.is_empty() {
            return Err(BusError::Config(
                "eligible_page_prefixes must not be empty".to_string(),
            ));
        }
        if self.eligible_page_prefixes.iter().any(String::is_empty) {
            return Err(BusError::Config(
                "eligible_page_prefixes must not contain empty prefixes".to_string(),
            ));
        }
        if self.invalid_origin_message.is_empty() {
            return Err(BusError::Config(
                "invalid_origin_message must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
