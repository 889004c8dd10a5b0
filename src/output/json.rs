//! JSON lines output formatter.

use crate::mac_address::MacAddress;
use crate::output::{OutputFormatter, Record};
use serde::Serialize;
use std::time::SystemTime;
use tracing::warn;

/// Writes each record as one JSON object.
///
/// Top-level keys describe the record: `type`, `mac` (sensor records only)
/// and `timestamp` in Unix milliseconds. The measurements or tracker fields
/// sit under `data`, so a measurement named like a record key cannot
/// shadow it.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac: Option<MacAddress>,
    timestamp: u64,
    data: &'a T,
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, record: &Record) -> String {
        let timestamp = unix_millis(record.timestamp());
        let line = match record {
            Record::Sensor { mac, data, .. } => serde_json::to_string(&Line {
                kind: record.kind(),
                mac: Some(*mac),
                timestamp,
                data,
            }),
            Record::Tracker { data, .. } => serde_json::to_string(&Line {
                kind: record.kind(),
                mac: None,
                timestamp,
                data,
            }),
        };
        line.unwrap_or_else(|error| {
            warn!(%error, "Failed to serialize record");
            String::new()
        })
    }
}
