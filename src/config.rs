//! Session configuration: whitelists, decryption keys and reporting policy.
//!
//! The configuration is immutable once a [`crate::router::Parser`] owns it.
//! Loading validates every entry so that bad input fails at startup rather
//! than per advertisement.

use crate::mac_address::{DeviceId, MacAddress, ParseMacError, parse_hex};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// AES-128 key length used by BTHome encryption.
pub const KEY_LEN: usize = 16;

/// Errors raised while building a [`ParserConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {list} entry '{entry}': {source}")]
    InvalidIdentity {
        list: &'static str,
        entry: String,
        source: ParseMacError,
    },
    #[error("invalid key address '{0}': {1}")]
    InvalidKeyAddress(String, ParseMacError),
    #[error("invalid key for {mac}: expected 16 bytes of hex")]
    InvalidKey { mac: MacAddress },
}

/// Which unknown advertisements get a diagnostic log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportUnknown {
    #[default]
    Off,
    /// BTHome payloads that fail to decode.
    Bthome,
    /// Advertisements without any known protocol payload.
    Other,
}

/// Configuration shared by every decode call of a session.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// When false, sensor data is only reported for whitelisted devices.
    pub discovery: bool,
    pub report_unknown: ReportUnknown,
    /// Not acted on by routing; read by protocol decoders.
    pub filter_duplicates: bool,
    pub sensor_whitelist: HashSet<DeviceId>,
    pub tracker_whitelist: HashSet<DeviceId>,
    pub report_unknown_whitelist: HashSet<DeviceId>,
    pub keys: HashMap<MacAddress, [u8; KEY_LEN]>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            discovery: true,
            report_unknown: ReportUnknown::Off,
            filter_duplicates: false,
            sensor_whitelist: HashSet::new(),
            tracker_whitelist: HashSet::new(),
            report_unknown_whitelist: HashSet::new(),
            keys: HashMap::new(),
        }
    }
}

impl ParserConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::try_from(file)
    }

    pub fn key_for(&self, mac: &MacAddress) -> Option<&[u8; KEY_LEN]> {
        self.keys.get(mac)
    }
}

/// On-disk shape of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub discovery: Option<bool>,
    pub report_unknown: Option<ReportUnknown>,
    pub filter_duplicates: Option<bool>,
    pub sensor_whitelist: Vec<String>,
    pub tracker_whitelist: Vec<String>,
    pub report_unknown_whitelist: Vec<String>,
    pub keys: BTreeMap<String, String>,
}

fn identities(list: &'static str, entries: &[String]) -> Result<HashSet<DeviceId>, ConfigError> {
    entries
        .iter()
        .map(|entry| {
            entry
                .parse::<DeviceId>()
                .map_err(|source| ConfigError::InvalidIdentity {
                    list,
                    entry: entry.clone(),
                    source,
                })
        })
        .collect()
}

fn parse_key_address(s: &str) -> Result<MacAddress, ConfigError> {
    s.parse()
        .map_err(|e| ConfigError::InvalidKeyAddress(s.to_string(), e))
}

impl TryFrom<ConfigFile> for ParserConfig {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let mut keys = HashMap::with_capacity(file.keys.len());
        for (address, key) in &file.keys {
            let mac = parse_key_address(address)?;
            let key: [u8; KEY_LEN] = parse_hex(key)
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or(ConfigError::InvalidKey { mac })?;
            keys.insert(mac, key);
        }

        let defaults = ParserConfig::default();
        Ok(Self {
            discovery: file.discovery.unwrap_or(defaults.discovery),
            report_unknown: file.report_unknown.unwrap_or(defaults.report_unknown),
            filter_duplicates: file.filter_duplicates.unwrap_or(defaults.filter_duplicates),
            sensor_whitelist: identities("sensor_whitelist", &file.sensor_whitelist)?,
            tracker_whitelist: identities("tracker_whitelist", &file.tracker_whitelist)?,
            report_unknown_whitelist: identities(
                "report_unknown_whitelist",
                &file.report_unknown_whitelist,
            )?,
            keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ParserConfig, ConfigError> {
        let file: ConfigFile = toml::from_str(text).unwrap();
        ParserConfig::try_from(file)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert!(config.discovery);
        assert_eq!(config.report_unknown, ReportUnknown::Off);
        assert!(!config.filter_duplicates);
        assert!(config.sensor_whitelist.is_empty());
        assert!(config.keys.is_empty());
    }

    #[test]
    fn test_full_file() {
        let config = parse(
            r#"
            discovery = false
            report_unknown = "other"
            filter_duplicates = true
            sensor_whitelist = ["A4:C1:38:11:22:33"]
            tracker_whitelist = ["a4c138112233", "0102030405060708"]
            report_unknown_whitelist = ["A4-C1-38-11-22-33"]

            [keys]
            "A4:C1:38:11:22:33" = "231d39c1d7cc1ab1aee224cd096db932"
            "#,
        )
        .unwrap();

        let mac = MacAddress([0xA4, 0xC1, 0x38, 0x11, 0x22, 0x33]);
        assert!(!config.discovery);
        assert_eq!(config.report_unknown, ReportUnknown::Other);
        assert!(config.filter_duplicates);
        assert!(config.sensor_whitelist.contains(&DeviceId::from(mac)));
        assert!(config.tracker_whitelist.contains(&DeviceId::from(mac)));
        assert_eq!(config.tracker_whitelist.len(), 2);
        assert!(config.report_unknown_whitelist.contains(&DeviceId::from(mac)));
        assert_eq!(config.key_for(&mac).unwrap()[0], 0x23);
    }

    #[test]
    fn test_invalid_whitelist_entry() {
        let err = parse(r#"sensor_whitelist = ["not-hex"]"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidIdentity {
                list: "sensor_whitelist",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_key_length() {
        let err = parse(
            r#"
            [keys]
            "A4:C1:38:11:22:33" = "abcd"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKey { .. }));
    }

    #[test]
    fn test_invalid_key_address() {
        let err = parse(
            r#"
            [keys]
            "A4:C1:38" = "231d39c1d7cc1ab1aee224cd096db932"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKeyAddress(_, _)));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(toml::from_str::<ConfigFile>("discovry = false").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ParserConfig::from_file(Path::new("/nonexistent/bthome.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
