//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running. An
//! advertisement monitor with one pattern per BTHome service UUID wakes us
//! for matching devices, whose properties are then read back as
//! [`AdvertisementFields`].

use super::{EVENT_CHANNEL_BUFFER_SIZE, ScanError, ScanEvent};
use crate::ad::AD_TYPE_SERVICE_DATA_UUID16;
use crate::advertisement::AdvertisementFields;
use crate::decoder::BTHOME_UUIDS;
use crate::mac_address::MacAddress;
use bluer::monitor::{Monitor, MonitorEvent, Pattern, RssiSamplingPeriod, Type};
use bluer::{Adapter, Address, Uuid};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bluetooth Base UUID with the 16-bit alias bits cleared.
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// 16-bit alias of a UUID derived from the Bluetooth Base UUID.
fn uuid16(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let alias = value >> 96;
    (value & ((1 << 96) - 1) == BLUETOOTH_BASE_UUID && alias <= u128::from(u16::MAX))
        .then_some(alias as u16)
}

fn bthome_patterns() -> Vec<Pattern> {
    BTHOME_UUIDS
        .iter()
        .map(|uuid| Pattern {
            data_type: AD_TYPE_SERVICE_DATA_UUID16,
            start_position: 0,
            content: uuid.to_le_bytes().to_vec(),
        })
        .collect()
}

/// Start a passive scan through BlueZ.
///
/// Found devices are forwarded as [`ScanEvent::Fields`]. Runs until the
/// receiver is dropped or BlueZ ends the monitor.
pub async fn start_scan() -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            monitor_type: Type::OrPatterns,
            rssi_sampling_period: Some(RssiSamplingPeriod::All),
            patterns: Some(bthome_patterns()),
            ..Default::default()
        })
        .await?;
    debug!(adapter = adapter.name(), "Registered BTHome advertisement monitor");

    // The task owns all Bluetooth state so it stays alive while scanning
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            let MonitorEvent::DeviceFound(device_id) = event else {
                continue;
            };
            match read_fields(&adapter, device_id.device).await {
                Ok(fields) => {
                    if tx.send(ScanEvent::Fields(fields)).await.is_err() {
                        debug!("Scan event receiver dropped, stopping BlueZ scan");
                        return;
                    }
                }
                Err(error) => warn!(address = %device_id.device, %error, "Failed to read device"),
            }
        }
    });

    Ok(rx)
}

/// Read the advertised properties BlueZ cached for a device.
async fn read_fields(
    adapter: &Adapter,
    address: Address,
) -> Result<AdvertisementFields, ScanError> {
    let device = adapter.device(address)?;

    let mut service_uuids16: Vec<u16> = device
        .uuids()
        .await?
        .unwrap_or_default()
        .iter()
        .filter_map(uuid16)
        .collect();
    service_uuids16.sort_unstable();

    let mut service_data: Vec<(u16, Vec<u8>)> = device
        .service_data()
        .await?
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(uuid, data)| Some((uuid16(&uuid)?, data)))
        .collect();
    // BTHome entries first, keeping the router's first-match order stable
    service_data.sort_by_key(|(uuid, _)| (!BTHOME_UUIDS.contains(uuid), *uuid));

    let mut manufacturer_data: Vec<(u16, Vec<u8>)> = device
        .manufacturer_data()
        .await?
        .unwrap_or_default()
        .into_iter()
        .collect();
    manufacturer_data.sort_unstable_by_key(|(id, _)| *id);

    Ok(AdvertisementFields {
        address: MacAddress::from(address).to_string(),
        rssi: device.rssi().await?,
        local_name: device.name().await?,
        service_uuids16,
        service_uuid128: None,
        service_data,
        manufacturer_data,
    })
}
