//! Output formatters for sensor and tracker records.
//!
//! Every record becomes one line of text. JSON lines suit log shippers,
//! InfluxDB line protocol suits Telegraf `execd` and similar collectors.

pub mod influxdb;
pub mod json;

use crate::mac_address::MacAddress;
use crate::reading::{SensorData, TrackerData};
use std::time::SystemTime;

pub use influxdb::InfluxDbFormatter;
pub use json::JsonFormatter;

/// One emitted record, stamped with the time it was received.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Sensor {
        mac: MacAddress,
        timestamp: SystemTime,
        data: SensorData,
    },
    Tracker {
        timestamp: SystemTime,
        data: TrackerData,
    },
}

impl Record {
    /// `"sensor"` or `"tracker"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Sensor { .. } => "sensor",
            Record::Tracker { .. } => "tracker",
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        match self {
            Record::Sensor { timestamp, .. } | Record::Tracker { timestamp, .. } => *timestamp,
        }
    }
}

/// Trait for formatting records into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a record as a single line, without the trailing newline.
    fn format(&self, record: &Record) -> String;
}

/// Output formats selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    /// One JSON object per line
    #[default]
    Json,
    /// InfluxDB line protocol
    Influxdb,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Json => write!(f, "json"),
            Format::Influxdb => write!(f, "influxdb"),
        }
    }
}

/// Build the formatter for `format`; `measurement` only applies to InfluxDB.
pub fn formatter(format: Format, measurement: &str) -> Box<dyn OutputFormatter> {
    match format {
        Format::Json => Box::new(JsonFormatter),
        Format::Influxdb => Box::new(InfluxDbFormatter::new(measurement.to_string())),
    }
}
