//! Protocol decoders for service data payloads.
//!
//! A decoder value owns all cross-packet state it needs (duplicate and
//! replay tracking). It is handed to the router by `&mut` for each
//! advertisement; callers sharing one decoder between threads must
//! serialize access to it.

pub mod bthome;

use crate::config::ParserConfig;
use crate::mac_address::{DeviceId, MacAddress};
use crate::reading::SensorData;

pub use bthome::BthomeDecoder;

/// BTHome v1 unencrypted (GATT "User Data" service).
pub const BTHOME_V1_UUID: u16 = 0x181C;
/// BTHome v1 encrypted (GATT "Bond Management" service).
pub const BTHOME_V1_ENCRYPTED_UUID: u16 = 0x181E;
/// BTHome v2 (Allterco Robotics member UUID).
pub const BTHOME_V2_UUID: u16 = 0xFCD2;

/// Service UUIDs routed to the BTHome decoder.
pub const BTHOME_UUIDS: [u16; 3] = [BTHOME_V1_UUID, BTHOME_V1_ENCRYPTED_UUID, BTHOME_V2_UUID];

pub fn is_bthome_uuid(uuid: u16) -> bool {
    BTHOME_UUIDS.contains(&uuid)
}

/// Successful decoder output.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub sensor_data: SensorData,
    /// Identity to check against the tracker whitelist instead of the MAC.
    pub tracker_id: Option<DeviceId>,
}

impl From<SensorData> for Decoded {
    fn from(sensor_data: SensorData) -> Self {
        Self {
            sensor_data,
            tracker_id: None,
        }
    }
}

/// Decoder for one advertising protocol.
pub trait ProtocolDecoder {
    /// Decode one service data structure.
    ///
    /// `service_data` is the complete AD structure: length, type, UUID
    /// (little-endian) and payload from offset 4. Returns `None` on any
    /// decryption or payload format failure.
    fn decode(
        &mut self,
        config: &ParserConfig,
        service_data: &[u8],
        uuid16: u16,
        mac: MacAddress,
    ) -> Option<Decoded>;
}

impl<D: ProtocolDecoder + ?Sized> ProtocolDecoder for &mut D {
    fn decode(
        &mut self,
        config: &ParserConfig,
        service_data: &[u8],
        uuid16: u16,
        mac: MacAddress,
    ) -> Option<Decoded> {
        (**self).decode(config, service_data, uuid16, mac)
    }
}
