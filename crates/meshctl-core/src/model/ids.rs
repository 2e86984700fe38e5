// ── Core identity types ──
//
// DeviceId, NodeAddress and DeviceRef name the things every controller
// talks about: unprovisioned beacons, provisioned mesh elements, and
// direct (non-mesh) BLE connections.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use uuid::Uuid;

// ── DeviceId ────────────────────────────────────────────────────────

/// Identifier of a device, stable across scanning and provisioning.
///
/// Mesh beacons advertise a 128-bit device UUID; some platforms only
/// expose an opaque peripheral string instead. Consumers compare ids
/// for equality and never need to know which form they hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    Uuid(Uuid),
    Opaque(String),
}

impl DeviceId {
    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::Uuid(u) => Some(u),
            Self::Opaque(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Uuid(u) => u.is_nil(),
            Self::Opaque(s) => s.trim().is_empty(),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Opaque(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<Uuid> for DeviceId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        match Uuid::parse_str(s.trim()) {
            Ok(u) => Self::Uuid(u),
            Err(_) => Self::Opaque(s),
        }
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

// ── NodeAddress ─────────────────────────────────────────────────────

/// 16-bit mesh unicast address of a provisioned node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(pub u16);

impl NodeAddress {
    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl FromStr for NodeAddress {
    type Err = ParseIntError;

    /// Accepts `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16)?,
            None => s.parse::<u16>()?,
        };
        Ok(Self(value))
    }
}

impl From<u16> for NodeAddress {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

// ── DeviceRef ───────────────────────────────────────────────────────

/// Opaque handle to a directly connected (point-to-point) BLE device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRef(String);

impl DeviceRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn device_id_from_uuid_string() {
        let id = DeviceId::from("550e8400-e29b-41d4-a716-446655440000");
        assert!(id.as_uuid().is_some());
    }

    #[test]
    fn device_id_from_simple_hex() {
        let id = DeviceId::from("550e8400e29b41d4a716446655440000");
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn device_id_from_opaque_string() {
        let id: DeviceId = "peripheral-7".parse().unwrap();
        assert!(id.as_uuid().is_none());
        assert_eq!(id.to_string(), "peripheral-7");
    }

    #[test]
    fn device_id_empty_detection() {
        assert!(DeviceId::from(Uuid::nil()).is_empty());
        assert!(DeviceId::from("   ").is_empty());
        assert!(!DeviceId::from("x").is_empty());
    }

    #[test]
    fn node_address_parses_hex_and_decimal() {
        assert_eq!("0x0010".parse::<NodeAddress>().unwrap(), NodeAddress(16));
        assert_eq!("42".parse::<NodeAddress>().unwrap(), NodeAddress(42));
        assert!("0xZZ".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn node_address_display_is_padded_hex() {
        assert_eq!(NodeAddress(0x1).to_string(), "0x0001");
    }
}
