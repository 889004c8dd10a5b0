//! `bthome-listener` library.
//!
//! Raw BLE advertisements are validated ([`framing`]), split into AD
//! structures ([`ad`]) and gathered into a [`DecodedAdvertisement`]. The
//! [`Parser`] routes BTHome service data to a [`ProtocolDecoder`] and applies
//! whitelist policy, producing optional sensor and tracker records.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit
//! codes. The run loop lives in [`crate::app`] where it can be tested with an
//! injected scanner and output streams.

pub mod ad;
pub mod advertisement;
pub mod app;
pub mod config;
pub mod decoder;
pub mod framing;
pub mod logging;
pub mod mac_address;
pub mod output;
pub mod reading;
pub mod router;
pub mod scanner;
pub mod throttle;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{AdvertisementFields, DecodedAdvertisement, IntoAdvertisement, RawReport};
pub use config::{ConfigError, ParserConfig, ReportUnknown};
pub use decoder::{BthomeDecoder, Decoded, ProtocolDecoder};
pub use framing::MalformedReport;
pub use mac_address::{DeviceId, MacAddress};
pub use output::{InfluxDbFormatter, JsonFormatter, OutputFormatter, Record};
pub use reading::{SensorData, TrackerData, Value};
pub use router::{Outcome, Parser, Rejection};
pub use scanner::{Backend, ScanError, ScanEvent};
pub use throttle::{Throttle, parse_duration};
