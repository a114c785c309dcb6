//! # Realms
//!
//! The isolated script contexts of the extension.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::BusError;

/// A script realm of the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Realm {
    /// Privileged background realm (service worker).
    Background,
    /// Extension UI realm.
    Popup,
    /// Page-attached realm, shares the DOM with the page.
    ContentScript,
    /// Page-injected realm, runs in the page's own JS context.
    Inpage,
}

impl Realm {
    /// All realms in declaration order.
    pub const ALL: [Realm; 4] = [
        Realm::Background,
        Realm::Popup,
        Realm::ContentScript,
        Realm::Inpage,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Popup => "popup",
            Self::ContentScript => "contentscript",
            Self::Inpage => "inpage",
        }
    }

    /// Whether this realm lives inside a web page rather than the extension.
    #[must_use]
    pub const fn is_page_realm(self) -> bool {
        matches!(self, Self::ContentScript | Self::Inpage)
    }
}

impl std::fmt::Display for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Realm {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "popup" | "ui" => Ok(Self::Popup),
            "contentscript" | "content-script" => Ok(Self::ContentScript),
            "inpage" => Ok(Self::Inpage),
            other => Err(BusError::Config(format!("unknown realm '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_realm() {
        assert_eq!("background".parse::<Realm>().unwrap(), Realm::Background);
        assert_eq!("UI".parse::<Realm>().unwrap(), Realm::Popup);
        assert_eq!(
            "content-script".parse::<Realm>().unwrap(),
            Realm::ContentScript
        );
        assert!("worker".parse::<Realm>().is_err());
    }

    #[test]
    fn test_display_matches_serde() {
        for realm in Realm::ALL {
            let json = serde_json::to_string(&realm).unwrap();
            assert_eq!(json, format!("\"{realm}\""));
        }
    }

    #[test]
    fn test_page_realms() {
        assert!(Realm::Inpage.is_page_realm());
        assert!(!Realm::Popup.is_page_realm());
    }
}
