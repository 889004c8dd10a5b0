//! The decoded form of one advertisement and the adapters producing it.
//!
//! Scanning back-ends deliver either a raw HCI report ([`RawReport`]) or
//! fields already split by the Bluetooth stack ([`AdvertisementFields`]).
//! Both implement [`IntoAdvertisement`] and converge on
//! [`DecodedAdvertisement`], so routing only ever sees one shape.

use crate::ad::{
    self, AD_TYPE_MANUFACTURER_DATA, AD_TYPE_SERVICE_DATA_UUID16, AdElement, AdStructure,
};
use crate::framing::{self, MalformedReport};
use crate::mac_address::MacAddress;

/// Fields extracted from a single advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedAdvertisement {
    pub mac: MacAddress,
    pub rssi: i8,
    /// Complete name if present, else shortened name, else empty.
    pub local_name: String,
    pub service_class_uuid16: Option<u16>,
    pub service_class_uuid128: Option<Vec<u8>>,
    /// Service data structures (type `0x16`), in payload order.
    pub service_data_list: Vec<AdElement>,
    /// Manufacturer specific structures (type `0xFF`), in payload order.
    pub man_spec_data_list: Vec<AdElement>,
}

impl DecodedAdvertisement {
    /// Assemble from walked structures. Later UUIDs and names overwrite earlier ones.
    pub fn from_structures(mac: MacAddress, rssi: i8, structures: Vec<AdStructure>) -> Self {
        let mut adv = Self {
            mac,
            rssi,
            ..Self::default()
        };
        let mut complete_name = String::new();
        let mut shortened_name = String::new();

        for structure in structures {
            match structure {
                AdStructure::ServiceUuid16(uuid) => adv.service_class_uuid16 = Some(uuid),
                AdStructure::ServiceUuid128(uuid) => adv.service_class_uuid128 = Some(uuid),
                AdStructure::ShortenedLocalName(name) => shortened_name = name,
                AdStructure::CompleteLocalName(name) => complete_name = name,
                AdStructure::ServiceData(element) => adv.service_data_list.push(element),
                AdStructure::ManufacturerData(element) => adv.man_spec_data_list.push(element),
            }
        }

        adv.local_name = if complete_name.is_empty() {
            shortened_name
        } else {
            complete_name
        };
        adv
    }
}

/// Conversion of a scanner delivery into a [`DecodedAdvertisement`].
pub trait IntoAdvertisement {
    fn into_advertisement(self) -> Result<DecodedAdvertisement, MalformedReport>;
}

impl IntoAdvertisement for DecodedAdvertisement {
    fn into_advertisement(self) -> Result<DecodedAdvertisement, MalformedReport> {
        Ok(self)
    }
}

/// A raw HCI LE advertising report event.
#[derive(Debug, Clone, Copy)]
pub struct RawReport<'a>(pub &'a [u8]);

impl IntoAdvertisement for RawReport<'_> {
    fn into_advertisement(self) -> Result<DecodedAdvertisement, MalformedReport> {
        let frame = framing::validate(self.0)?;
        Ok(DecodedAdvertisement::from_structures(
            frame.mac,
            frame.rssi,
            ad::walk(frame.payload),
        ))
    }
}

/// Advertisement fields as reported by a stack that parses AD data itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementFields {
    /// Formatted device address, `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    pub rssi: Option<i16>,
    pub local_name: Option<String>,
    /// 16-bit service class UUIDs.
    pub service_uuids16: Vec<u16>,
    pub service_uuid128: Option<[u8; 16]>,
    /// Service data keyed by 16-bit UUID.
    pub service_data: Vec<(u16, Vec<u8>)>,
    /// Manufacturer data keyed by company id.
    pub manufacturer_data: Vec<(u16, Vec<u8>)>,
}

fn clamp_rssi(rssi: i16) -> i8 {
    rssi.clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8
}

fn prefixed_element(ad_type: u8, id: u16, data: &[u8]) -> Option<AdElement> {
    let mut value = Vec::with_capacity(data.len() + 2);
    value.extend_from_slice(&id.to_le_bytes());
    value.extend_from_slice(data);
    AdElement::encode(ad_type, &value)
}

impl IntoAdvertisement for AdvertisementFields {
    fn into_advertisement(self) -> Result<DecodedAdvertisement, MalformedReport> {
        let mac: MacAddress = self
            .address
            .parse()
            .map_err(|e| MalformedReport::InvalidAddress(format!("{}: {e}", self.address)))?;

        // Rebuild the raw structures so decoders see the same layout as from
        // a raw report; entries too long for one structure are dropped.
        let service_data_list = self
            .service_data
            .iter()
            .filter(|(_, data)| !data.is_empty())
            .filter_map(|(uuid, data)| prefixed_element(AD_TYPE_SERVICE_DATA_UUID16, *uuid, data))
            .collect();
        let man_spec_data_list = self
            .manufacturer_data
            .iter()
            .filter_map(|(id, data)| prefixed_element(AD_TYPE_MANUFACTURER_DATA, *id, data))
            .collect();

        Ok(DecodedAdvertisement {
            mac,
            rssi: self.rssi.map(clamp_rssi).unwrap_or_default(),
            local_name: self.local_name.unwrap_or_default(),
            service_class_uuid16: self.service_uuids16.last().copied(),
            service_class_uuid128: self.service_uuid128.map(|u| u.to_vec()),
            service_data_list,
            man_spec_data_list,
        })
    }
}
