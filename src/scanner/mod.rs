//! BLE scanning back-ends.
//!
//! A back-end delivers advertisements on a channel, either as raw HCI
//! advertising report events or as fields already split by BlueZ. Decoding
//! happens downstream in the router, so back-ends never interpret payloads.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::{AdvertisementFields, DecodedAdvertisement, IntoAdvertisement, RawReport};
use crate::framing::MalformedReport;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised while starting a scan.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// One received advertisement, in whichever shape the back-end produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Complete HCI LE (extended) advertising report event.
    Raw(Vec<u8>),
    Fields(AdvertisementFields),
}

impl IntoAdvertisement for ScanEvent {
    fn into_advertisement(self) -> Result<DecodedAdvertisement, MalformedReport> {
        match self {
            ScanEvent::Raw(raw) => RawReport(&raw).into_advertisement(),
            ScanEvent::Fields(fields) => fields.into_advertisement(),
        }
    }
}

/// Channel buffer size for scan events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Compiled-in scanner back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ advertisement monitor over D-Bus; needs bluetoothd
    #[cfg(feature = "bluer")]
    #[value(alias = "bluez")]
    Bluer,
    /// Raw HCI socket; needs CAP_NET_RAW and CAP_NET_ADMIN
    #[cfg(feature = "hci")]
    #[value(alias = "raw")]
    Hci,
}

#[cfg(not(any(feature = "bluer", feature = "hci")))]
compile_error!("At least one backend feature must be enabled");

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = clap::ValueEnum::to_possible_value(self).ok_or(std::fmt::Error)?;
        f.write_str(value.get_name())
    }
}

/// Case-insensitive, accepting the same names and aliases as `--backend`.
impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as clap::ValueEnum>::from_str(s, true).map_err(|_| format!("Unknown backend: {s}"))
    }
}

/// Start scanning with the given backend.
///
/// The returned channel yields every advertisement the back-end sees until
/// the scan task stops.
pub async fn start_scan(backend: Backend) -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan().await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan().await,
    }
}
