//! InfluxDB line protocol output formatter.

use crate::output::{OutputFormatter, Record};
use crate::reading::Value;
use std::collections::BTreeMap;
use std::fmt;
#[cfg(test)]
use std::time::Duration;
use std::time::SystemTime;

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, Value>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, spaces and equals signs in tag keys and values.
fn escape_tag(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

struct FieldValue<'a>(&'a Value);

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}i"),
            Value::Float(num) => write!(f, "{num}"),
            Value::Text(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", escape_tag(key), escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", escape_tag(key), FieldValue(value))?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(elapsed) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
    {
        write!(fmt, " {}", elapsed.as_nanos())?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement.replace(',', "\\,").replace(' ', "\\ "))?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Tags are `mac` and `record` (`sensor` or `tracker`). Sensor measurements
/// become fields as decoded; tracker records carry `is_connected`, `rssi`,
/// `local_name` and, when the decoder supplied one, `tracker_id`.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, record: &Record) -> BTreeMap<String, String> {
        let mac = match record {
            Record::Sensor { mac, .. } => mac.to_string(),
            Record::Tracker { data, .. } => data.mac.clone(),
        };
        BTreeMap::from([
            ("mac".to_string(), mac),
            ("record".to_string(), record.kind().to_string()),
        ])
    }

    fn field_set(&self, record: &Record) -> BTreeMap<String, Value> {
        match record {
            Record::Sensor { data, .. } => data
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
            Record::Tracker { data, .. } => {
                let mut fields = BTreeMap::from([
                    ("is_connected".to_string(), Value::Bool(data.is_connected)),
                    ("rssi".to_string(), Value::from(data.rssi)),
                    ("local_name".to_string(), Value::from(data.local_name.as_str())),
                ]);
                if let Some(id) = &data.tracker_id {
                    fields.insert("tracker_id".to_string(), Value::from(id.as_str()));
                }
                fields
            }
        }
    }

    fn to_data_point(&self, record: &Record) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(record),
            field_set: self.field_set(record),
            timestamp: Some(record.timestamp()),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, record: &Record) -> String {
        format!("{}", self.to_data_point(record))
    }
}
