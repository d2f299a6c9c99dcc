//! Value objects for the provisioning domain

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Device identifier — a stable, store-assigned integer, not a UUID: the
/// original implementation used an auto-increment primary key and the RPC
/// surface (§6) exposes it as a plain integer `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub i64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Option82Association identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Option82Id(pub i64);

impl fmt::Display for Option82Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel value for attributes not yet discovered (device_type, version,
/// mac_address) — per §3 invariants.
pub const UNKNOWN: &str = "UNKNOWN";

/// A MAC address, normalized to lower-case colon-separated form.
///
/// Unlike a fixed `[u8; 6]` representation, this wraps a `String` so it can
/// also hold the `"UNKNOWN"` sentinel before discovery (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(String);

#[derive(Error, Debug)]
pub enum MacAddressError {
    #[error("invalid MAC address: {0}")]
    InvalidFormat(String),
}

impl MacAddress {
    /// The `"UNKNOWN"` sentinel.
    pub fn unknown() -> Self {
        Self(UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN
    }

    /// Parse a MAC address from colon-, dash-, or Cisco dot-grouped
    /// (`04fe.7f07.9040`) notation and normalize it to lower-case
    /// colon-separated form.
    pub fn parse(s: &str) -> Result<Self, MacAddressError> {
        let cleaned: String = s
            .chars()
            .filter(|c| *c != ':' && *c != '-' && *c != '.')
            .collect();

        if cleaned.len() != 12 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MacAddressError::InvalidFormat(s.to_string()));
        }

        let lower = cleaned.to_lowercase();
        let parts: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
        Ok(Self(parts.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for MacAddress {
    fn default() -> Self {
        Self::unknown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_cisco_dot_notation() {
        let mac = MacAddress::parse("04fe.7f07.9040").unwrap();
        assert_eq!(mac.as_str(), "04:fe:7f:07:90:40");
    }

    #[test]
    fn normalizes_colon_and_dash_forms() {
        assert_eq!(
            MacAddress::parse("04:FE:7F:07:90:40").unwrap().as_str(),
            "04:fe:7f:07:90:40"
        );
        assert_eq!(
            MacAddress::parse("04-fe-7f-07-90-40").unwrap().as_str(),
            "04:fe:7f:07:90:40"
        );
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(MacAddress::parse("04fe.7f07").is_err());
    }

    #[test]
    fn unknown_sentinel_round_trips() {
        let mac = MacAddress::unknown();
        assert!(mac.is_unknown());
        assert_eq!(mac.as_str(), "UNKNOWN");
    }
}
