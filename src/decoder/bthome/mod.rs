//! BTHome v1 and v2 service data decoder.
//!
//! See <https://bthome.io/format/>. The decoder keeps the last packet id and
//! encryption counter per device so repeated advertisements can be dropped.

mod crypto;
pub mod objects;

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};

use super::{BTHOME_V1_ENCRYPTED_UUID, BTHOME_V1_UUID, BTHOME_V2_UUID, Decoded, ProtocolDecoder};
use crate::config::{ParserConfig, ReportUnknown};
use crate::mac_address::MacAddress;
use crate::reading::{SensorData, Value};
use objects::{Format, ObjectSpec};

/// Offset of the BTHome payload within the service data structure.
const PAYLOAD_OFFSET: usize = 4;

const INFO_ENCRYPTED: u8 = 0x01;
const INFO_TRIGGER_BASED: u8 = 0x04;
const INFO_VERSION_SHIFT: u8 = 5;

/// v1 control byte: low bits are the object length, high bits the format.
const V1_LENGTH_MASK: u8 = 0x1F;
const V1_FORMAT_SHIFT: u8 = 5;

/// Why a BTHome payload was not decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BthomeError {
    #[error("service data too short ({0} bytes)")]
    TooShort(usize),
    #[error("unsupported UUID {0:#06x}")]
    UnsupportedUuid(u16),
    #[error("unsupported BTHome version {0}")]
    UnsupportedVersion(u8),
    #[error("no encryption key for {0}")]
    MissingKey(MacAddress),
    #[error("decryption failed for {0}")]
    Decryption(MacAddress),
    #[error("encryption counter {counter} not newer than {last}")]
    Replay { counter: u32, last: u32 },
    #[error("duplicate packet id {0}")]
    Duplicate(u8),
    #[error("unknown object id {0:#04x}")]
    UnknownObject(u8),
    #[error("unsupported v1 object format {0}")]
    UnsupportedFormat(u8),
    #[error("object {0:#04x} truncated")]
    Truncated(u8),
    #[error("object {0:#04x} is not valid text")]
    InvalidText(u8),
    #[error("no measurements in payload")]
    Empty,
}

/// Cross-packet state for BTHome devices.
#[derive(Debug, Default)]
pub struct BthomeDecoder {
    last_packet: HashMap<MacAddress, u8>,
    last_counter: HashMap<MacAddress, u32>,
}

impl BthomeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode with the failure reason preserved.
    pub fn try_decode(
        &mut self,
        config: &ParserConfig,
        service_data: &[u8],
        uuid16: u16,
        mac: MacAddress,
    ) -> Result<SensorData, BthomeError> {
        if service_data.len() <= PAYLOAD_OFFSET {
            return Err(BthomeError::TooShort(service_data.len()));
        }
        let payload = &service_data[PAYLOAD_OFFSET..];

        let data = match uuid16 {
            BTHOME_V2_UUID => self.decode_v2(config, payload, uuid16, mac)?,
            BTHOME_V1_UUID => {
                let mut data = parse_v1_objects(payload)?;
                data.insert("firmware", "BTHome V1");
                data
            }
            BTHOME_V1_ENCRYPTED_UUID => {
                let plaintext = self.open_v1(config, payload, uuid16, mac)?;
                let mut data = parse_v1_objects(&plaintext)?;
                data.insert("firmware", "BTHome V1");
                data
            }
            other => return Err(BthomeError::UnsupportedUuid(other)),
        };

        if let Some(packet) = data.get("packet").and_then(packet_id) {
            if config.filter_duplicates && self.last_packet.get(&mac) == Some(&packet) {
                return Err(BthomeError::Duplicate(packet));
            }
            self.last_packet.insert(mac, packet);
        }

        Ok(data)
    }

    fn decode_v2(
        &mut self,
        config: &ParserConfig,
        payload: &[u8],
        uuid16: u16,
        mac: MacAddress,
    ) -> Result<SensorData, BthomeError> {
        let info = payload[0];
        let version = info >> INFO_VERSION_SHIFT;
        if version != 2 {
            return Err(BthomeError::UnsupportedVersion(version));
        }
        let body = &payload[1..];

        let mut data = if info & INFO_ENCRYPTED != 0 {
            let sealed = crypto::Sealed::split(body).ok_or(BthomeError::TooShort(payload.len()))?;
            let key = config.key_for(&mac).ok_or(BthomeError::MissingKey(mac))?;
            let nonce = crypto::nonce_v2(mac, uuid16, info, sealed.counter);
            let plaintext =
                crypto::decrypt_v2(key, &nonce, &sealed).ok_or(BthomeError::Decryption(mac))?;
            self.check_counter(mac, sealed.counter_value())?;
            parse_v2_objects(&plaintext)?
        } else {
            parse_v2_objects(body)?
        };

        data.insert("firmware", "BTHome V2");
        data.insert("trigger_based", info & INFO_TRIGGER_BASED != 0);
        Ok(data)
    }

    fn open_v1(
        &mut self,
        config: &ParserConfig,
        payload: &[u8],
        uuid16: u16,
        mac: MacAddress,
    ) -> Result<Vec<u8>, BthomeError> {
        let sealed = crypto::Sealed::split(payload).ok_or(BthomeError::TooShort(payload.len()))?;
        let key = config.key_for(&mac).ok_or(BthomeError::MissingKey(mac))?;
        let nonce = crypto::nonce_v1(mac, uuid16, sealed.counter);
        let plaintext =
            crypto::decrypt_v1(key, &nonce, &sealed).ok_or(BthomeError::Decryption(mac))?;
        self.check_counter(mac, sealed.counter_value())?;
        Ok(plaintext)
    }

    fn check_counter(&mut self, mac: MacAddress, counter: u32) -> Result<(), BthomeError> {
        if let Some(&last) = self.last_counter.get(&mac)
            && counter < last
        {
            return Err(BthomeError::Replay { counter, last });
        }
        self.last_counter.insert(mac, counter);
        Ok(())
    }
}

impl ProtocolDecoder for BthomeDecoder {
    fn decode(
        &mut self,
        config: &ParserConfig,
        service_data: &[u8],
        uuid16: u16,
        mac: MacAddress,
    ) -> Option<Decoded> {
        match self.try_decode(config, service_data, uuid16, mac) {
            Ok(data) => Some(data.into()),
            Err(error) => {
                if config.report_unknown == ReportUnknown::Bthome {
                    info!(
                        %mac,
                        uuid = format_args!("{uuid16:#06x}"),
                        %error,
                        "BTHome decode failed"
                    );
                } else {
                    debug!(%mac, %error, "BTHome decode failed");
                }
                None
            }
        }
    }
}

fn packet_id(value: &Value) -> Option<u8> {
    match value {
        Value::Int(id) => u8::try_from(*id).ok(),
        _ => None,
    }
}

fn insert_object(
    data: &mut SensorData,
    spec: &ObjectSpec,
    format: Format,
    bytes: &[u8],
) -> Result<(), BthomeError> {
    let value = objects::value(format, spec.decimals, bytes)
        .ok_or(BthomeError::InvalidText(spec.id))?;
    data.insert_unique(spec.name, value);
    Ok(())
}

/// Parse the v2 object stream: `id, value[len]` repeated.
pub fn parse_v2_objects(mut bytes: &[u8]) -> Result<SensorData, BthomeError> {
    let mut data = SensorData::new();

    while let Some((&id, rest)) = bytes.split_first() {
        let spec = objects::lookup(id).ok_or(BthomeError::UnknownObject(id))?;
        let (len, rest) = match spec.format {
            Format::Text | Format::Raw => {
                let (&len, rest) = rest.split_first().ok_or(BthomeError::Truncated(id))?;
                (usize::from(len), rest)
            }
            _ => (spec.len, rest),
        };
        if rest.len() < len {
            return Err(BthomeError::Truncated(id));
        }
        let (value, rest) = rest.split_at(len);
        insert_object(&mut data, spec, spec.format, value)?;
        bytes = rest;
    }

    if data.is_empty() {
        return Err(BthomeError::Empty);
    }
    Ok(data)
}

/// Parse the v1 object stream: `control, type, value[len - 1]` repeated.
pub fn parse_v1_objects(mut bytes: &[u8]) -> Result<SensorData, BthomeError> {
    let mut data = SensorData::new();

    while let Some((&control, rest)) = bytes.split_first() {
        let len = usize::from(control & V1_LENGTH_MASK);
        let format_code = control >> V1_FORMAT_SHIFT;
        if len == 0 || rest.len() < len {
            return Err(BthomeError::Truncated(control));
        }
        let (object, rest) = rest.split_at(len);
        let id = object[0];
        let value = &object[1..];
        let spec = objects::lookup(id).ok_or(BthomeError::UnknownObject(id))?;

        let format = match (format_code, spec.format) {
            (0 | 1, Format::Binary) => Format::Binary,
            (0, _) => Format::Unsigned,
            (1, _) => Format::Signed,
            (3, _) => Format::Text,
            (4, _) => Format::Raw,
            (other, _) => return Err(BthomeError::UnsupportedFormat(other)),
        };
        insert_object(&mut data, spec, format, value)?;
        bytes = rest;
    }

    if data.is_empty() {
        return Err(BthomeError::Empty);
    }
    Ok(data)
}
