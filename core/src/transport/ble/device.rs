//! Discovered and connected device descriptors
//!
//! An [`Advertisement`] is what a scanner hands to the core before any
//! connection exists. A [`PeripheralInfo`] describes a device the session is
//! connected to; it carries no handle, so it can be cloned into the state
//! sequence without giving observers write access to the link.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A discovered, not yet connected peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Advertisement {
    /// Platform identifier (MAC address, or an opaque id where the OS hides it)
    pub id: String,
    /// Advertised local name
    pub name: Option<String>,
    /// RSSI in dBm at discovery time
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Create an advertisement with only an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Name if advertised, otherwise the identifier
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Case-insensitive match against the identifier or the advertised name
    pub fn matches(&self, query: &str) -> bool {
        if self.id.eq_ignore_ascii_case(query) {
            return true;
        }
        self.name
            .as_deref()
            .map(|name| name.to_lowercase().contains(&query.to_lowercase()))
            .unwrap_or(false)
    }
}

impl fmt::Display for Advertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.rssi) {
            (Some(name), Some(rssi)) => write!(f, "{} ({}, {} dBm)", name, self.id, rssi),
            (Some(name), None) => write!(f, "{} ({})", name, self.id),
            (None, Some(rssi)) => write!(f, "{} ({} dBm)", self.id, rssi),
            (None, None) => write!(f, "{}", self.id),
        }
    }
}

/// Identity of a connected peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeripheralInfo {
    pub id: String,
    pub name: Option<String>,
}

impl From<&Advertisement> for PeripheralInfo {
    fn from(advertisement: &Advertisement) -> Self {
        Self {
            id: advertisement.id.clone(),
            name: advertisement.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertisement_matches_id_and_name() {
        let adv = Advertisement::new("AA:BB:CC:DD:EE:FF").with_name("RICOH GR III");

        assert!(adv.matches("aa:bb:cc:dd:ee:ff"));
        assert!(adv.matches("gr iii"));
        assert!(!adv.matches("Pentax"));
    }

    #[test]
    fn test_advertisement_display_name_falls_back_to_id() {
        let adv = Advertisement::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(adv.display_name(), "AA:BB:CC:DD:EE:FF");

        let named = adv.with_name("GR");
        assert_eq!(named.display_name(), "GR");
    }

    #[test]
    fn test_advertisement_display() {
        let adv = Advertisement::new("id-1").with_name("GR").with_rssi(-60);
        assert_eq!(adv.to_string(), "GR (id-1, -60 dBm)");
    }

    #[test]
    fn test_peripheral_info_from_advertisement() {
        let adv = Advertisement::new("id-1").with_name("GR").with_rssi(-42);
        let info = PeripheralInfo::from(&adv);

        assert_eq!(info.id, "id-1");
        assert_eq!(info.name.as_deref(), Some("GR"));
    }

    #[test]
    fn test_advertisement_serde() {
        let adv = Advertisement::new("AA:BB").with_name("GR");
        let json = serde_json::to_string(&adv).unwrap();
        let back: Advertisement = serde_json::from_str(&json).unwrap();

        assert_eq!(back, adv);
        assert!(json.contains("\"rssi\":null"));
    }
}
