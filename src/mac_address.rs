//! Device addressing for BLE advertisers.
//!
//! [`MacAddress`] is the compact 6-byte address extracted from advertising
//! reports. [`DeviceId`] is the looser identity used by whitelists and tracker
//! ids: usually a MAC, but protocol decoders may supply longer identifiers.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored most-significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Build an address from the little-endian byte order used on the HCI wire.
    pub fn from_le_bytes(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    /// Uppercase hex without separators, e.g. `AABBCCDDEEFF`.
    pub fn to_unformatted(&self) -> String {
        self.0.iter().map(|b| format!("{b:02X}")).collect()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Errors returned when parsing a MAC address or device identity string.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseMacError {
    #[error("expected 6 address bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex: '{0}'")]
    InvalidHex(String),
    #[error("empty device identity")]
    Empty,
}

/// Accepts `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff` and `aabbccddeeff`.
impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = parse_hex(s)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map(MacAddress)
            .map_err(|_| ParseMacError::InvalidLength(len))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

/// An opaque device identity, compared byte for byte.
///
/// Whitelists hold these. A MAC address converts into the identity made of its
/// six bytes, so `"AA:BB:CC:DD:EE:FF"` and `"aabbccddeeff"` name the same device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(Vec<u8>);

impl DeviceId {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex, the form used in diagnostics.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl From<MacAddress> for DeviceId {
    fn from(mac: MacAddress) -> Self {
        Self(mac.0.to_vec())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for DeviceId {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s).map(Self)
    }
}

/// Parse hex digits, ignoring `:` and `-` separators and surrounding whitespace.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, ParseMacError> {
    let digits: String = s
        .trim()
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    if digits.is_empty() {
        return Err(ParseMacError::Empty);
    }
    // from_str_radix would also take a sign
    if digits.len() % 2 != 0 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseMacError::InvalidHex(s.to_string()));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| ParseMacError::InvalidHex(s.to_string()))
        })
        .collect()
}
