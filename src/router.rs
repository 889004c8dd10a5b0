//! Routing of decoded advertisements to protocol decoders and whitelist policy.

use thiserror::Error;
use tracing::{debug, info};

use crate::ad::AdElement;
use crate::advertisement::{
    AdvertisementFields, DecodedAdvertisement, IntoAdvertisement, RawReport,
};
use crate::config::{ParserConfig, ReportUnknown};
use crate::decoder::{ProtocolDecoder, is_bthome_uuid};
use crate::framing::MalformedReport;
use crate::mac_address::{DeviceId, MacAddress};
use crate::reading::{SensorData, TrackerData};

/// Why an advertisement produced no sensor record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("malformed report: {0}")]
    Malformed(#[from] MalformedReport),
    #[error("no service data for a known protocol")]
    UnknownProtocol,
    #[error("service data {uuid16:#06x} did not decode")]
    DecodeFailure { uuid16: u16 },
    #[error("{0} is not in the sensor whitelist")]
    NotWhitelisted(MacAddress),
}

/// Result of routing one advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Device address, unless the report was too malformed to carry one.
    pub mac: Option<MacAddress>,
    pub sensor: Result<SensorData, Rejection>,
    pub tracker: Option<TrackerData>,
}

impl Outcome {
    fn malformed(error: MalformedReport) -> Self {
        Self {
            mac: None,
            sensor: Err(error.into()),
            tracker: None,
        }
    }

    pub fn into_options(self) -> (Option<SensorData>, Option<TrackerData>) {
        (self.sensor.ok(), self.tracker)
    }
}

/// A decoding session: immutable whitelist and key configuration.
///
/// Routing takes `&self`, so one `Parser` can be shared freely. Cross-packet
/// state lives in the decoder passed to each call.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    config: ParserConfig,
}

impl Parser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Decode a raw HCI advertising report.
    pub fn parse_raw_data<D: ProtocolDecoder>(
        &self,
        raw: &[u8],
        decoder: &mut D,
    ) -> (Option<SensorData>, Option<TrackerData>) {
        self.ingest(RawReport(raw), decoder).into_options()
    }

    /// Decode an advertisement already split into fields by the Bluetooth stack.
    pub fn parse_fields<D: ProtocolDecoder>(
        &self,
        fields: AdvertisementFields,
        decoder: &mut D,
    ) -> (Option<SensorData>, Option<TrackerData>) {
        self.ingest(fields, decoder).into_options()
    }

    /// Convert any supported input shape and route it.
    pub fn ingest<D: ProtocolDecoder>(
        &self,
        input: impl IntoAdvertisement,
        decoder: &mut D,
    ) -> Outcome {
        match input.into_advertisement() {
            Ok(adv) => self.route(&adv, decoder),
            Err(error) => {
                debug!(%error, "Dropping malformed advertisement");
                Outcome::malformed(error)
            }
        }
    }

    pub fn route<D: ProtocolDecoder>(
        &self,
        adv: &DecodedAdvertisement,
        decoder: &mut D,
    ) -> Outcome {
        let config = &self.config;
        let mac = adv.mac;

        let mut tracker_id = None;
        let decoded = match find_known_service(&adv.service_data_list) {
            Some((element, uuid16)) => {
                match decoder.decode(config, element.as_bytes(), uuid16, mac) {
                    Some(decoded) if !decoded.sensor_data.is_empty() => {
                        tracker_id = decoded.tracker_id;
                        Ok(decoded.sensor_data)
                    }
                    Some(decoded) => {
                        tracker_id = decoded.tracker_id;
                        Err(Rejection::DecodeFailure { uuid16 })
                    }
                    None => Err(Rejection::DecodeFailure { uuid16 }),
                }
            }
            None => Err(Rejection::UnknownProtocol),
        };

        if matches!(decoded, Err(Rejection::UnknownProtocol))
            && config.report_unknown == ReportUnknown::Other
        {
            report(adv, "Unknown advertisement");
        }

        let mac_id = DeviceId::from(mac);
        let sensor = decoded.and_then(|mut data| {
            if !config.discovery && !config.sensor_whitelist.contains(&mac_id) {
                return Err(Rejection::NotWhitelisted(mac));
            }
            data.insert("rssi", adv.rssi);
            data.insert("local_name", adv.local_name.as_str());
            Ok(data)
        });

        let reported_id = tracker_id.as_ref().map(DeviceId::to_hex);
        let identity = tracker_id.unwrap_or(mac_id);
        let tracker = config
            .tracker_whitelist
            .contains(&identity)
            .then(|| TrackerData {
                tracker_id: reported_id,
                mac: mac.to_unformatted(),
                is_connected: true,
                rssi: adv.rssi,
                local_name: adv.local_name.clone(),
            });

        if config.report_unknown_whitelist.contains(&identity) {
            report(adv, "Advertisement from report_unknown_whitelist device");
        }

        Outcome {
            mac: Some(mac),
            sensor,
            tracker,
        }
    }
}

/// First service data structure carrying a BTHome UUID.
fn find_known_service(service_data: &[AdElement]) -> Option<(&AdElement, u16)> {
    service_data.iter().find_map(|element| {
        element
            .uuid16()
            .filter(|uuid| is_bthome_uuid(*uuid))
            .map(|uuid| (element, uuid))
    })
}

fn report(adv: &DecodedAdvertisement, message: &str) {
    info!(
        mac = %adv.mac,
        service_data = ?adv.service_data_list,
        manufacturer_data = ?adv.man_spec_data_list,
        local_name = %adv.local_name,
        uuid16 = ?adv.service_class_uuid16,
        uuid128 = ?adv.service_class_uuid128,
        "{message}"
    );
}
