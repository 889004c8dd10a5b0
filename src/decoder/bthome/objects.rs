//! BTHome object ids, sizes and scaling.

use crate::reading::Value;

/// How an object's bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Unsigned,
    Signed,
    Binary,
    /// Length-prefixed UTF-8.
    Text,
    /// Length-prefixed bytes, reported as hex.
    Raw,
    /// Version number, least significant part first.
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectSpec {
    pub id: u8,
    pub name: &'static str,
    /// Value size in bytes; zero for length-prefixed formats.
    pub len: usize,
    pub format: Format,
    /// Value is the raw integer divided by `10^decimals`.
    pub decimals: u8,
}

const fn spec(id: u8, name: &'static str, len: usize, format: Format, decimals: u8) -> ObjectSpec {
    ObjectSpec {
        id,
        name,
        len,
        format,
        decimals,
    }
}

use Format::{Binary, Raw, Signed, Text, Unsigned, Version};

static OBJECTS: &[ObjectSpec] = &[
    spec(0x00, "packet", 1, Unsigned, 0),
    spec(0x01, "battery", 1, Unsigned, 0),
    spec(0x02, "temperature", 2, Signed, 2),
    spec(0x03, "humidity", 2, Unsigned, 2),
    spec(0x04, "pressure", 3, Unsigned, 2),
    spec(0x05, "illuminance", 3, Unsigned, 2),
    spec(0x06, "mass_kg", 2, Unsigned, 2),
    spec(0x07, "mass_lb", 2, Unsigned, 2),
    spec(0x08, "dewpoint", 2, Signed, 2),
    spec(0x09, "count", 1, Unsigned, 0),
    spec(0x0A, "energy", 3, Unsigned, 3),
    spec(0x0B, "power", 3, Unsigned, 2),
    spec(0x0C, "voltage", 2, Unsigned, 3),
    spec(0x0D, "pm2_5", 2, Unsigned, 0),
    spec(0x0E, "pm10", 2, Unsigned, 0),
    spec(0x0F, "generic_boolean", 1, Binary, 0),
    spec(0x10, "power_on", 1, Binary, 0),
    spec(0x11, "opening", 1, Binary, 0),
    spec(0x12, "co2", 2, Unsigned, 0),
    spec(0x13, "tvoc", 2, Unsigned, 0),
    spec(0x14, "moisture", 2, Unsigned, 2),
    spec(0x15, "battery_low", 1, Binary, 0),
    spec(0x16, "battery_charging", 1, Binary, 0),
    spec(0x17, "carbon_monoxide", 1, Binary, 0),
    spec(0x18, "cold", 1, Binary, 0),
    spec(0x19, "connectivity", 1, Binary, 0),
    spec(0x1A, "door", 1, Binary, 0),
    spec(0x1B, "garage_door", 1, Binary, 0),
    spec(0x1C, "gas_detected", 1, Binary, 0),
    spec(0x1D, "heat", 1, Binary, 0),
    spec(0x1E, "light", 1, Binary, 0),
    spec(0x1F, "lock", 1, Binary, 0),
    spec(0x20, "moisture_detected", 1, Binary, 0),
    spec(0x21, "motion", 1, Binary, 0),
    spec(0x22, "moving", 1, Binary, 0),
    spec(0x23, "occupancy", 1, Binary, 0),
    spec(0x24, "plug", 1, Binary, 0),
    spec(0x25, "presence", 1, Binary, 0),
    spec(0x26, "problem", 1, Binary, 0),
    spec(0x27, "running", 1, Binary, 0),
    spec(0x28, "safety", 1, Binary, 0),
    spec(0x29, "smoke", 1, Binary, 0),
    spec(0x2A, "sound", 1, Binary, 0),
    spec(0x2B, "tamper", 1, Binary, 0),
    spec(0x2C, "vibration", 1, Binary, 0),
    spec(0x2D, "window", 1, Binary, 0),
    spec(0x2E, "humidity", 1, Unsigned, 0),
    spec(0x2F, "moisture", 1, Unsigned, 0),
    spec(0x3A, "button", 1, Unsigned, 0),
    spec(0x3D, "count", 2, Unsigned, 0),
    spec(0x3E, "count", 4, Unsigned, 0),
    spec(0x3F, "rotation", 2, Signed, 1),
    spec(0x40, "distance_mm", 2, Unsigned, 0),
    spec(0x41, "distance_m", 2, Unsigned, 1),
    spec(0x42, "duration", 3, Unsigned, 3),
    spec(0x43, "current", 2, Unsigned, 3),
    spec(0x44, "speed", 2, Unsigned, 2),
    spec(0x45, "temperature", 2, Signed, 1),
    spec(0x46, "uv_index", 1, Unsigned, 1),
    spec(0x47, "volume_l", 2, Unsigned, 1),
    spec(0x48, "volume_ml", 2, Unsigned, 0),
    spec(0x49, "volume_flow_rate", 2, Unsigned, 3),
    spec(0x4A, "voltage", 2, Unsigned, 1),
    spec(0x4B, "gas", 3, Unsigned, 3),
    spec(0x4C, "gas", 4, Unsigned, 3),
    spec(0x4D, "energy", 4, Unsigned, 3),
    spec(0x4E, "volume", 4, Unsigned, 3),
    spec(0x4F, "water", 4, Unsigned, 3),
    spec(0x50, "timestamp", 4, Unsigned, 0),
    spec(0x51, "acceleration", 2, Unsigned, 3),
    spec(0x52, "gyroscope", 2, Unsigned, 3),
    spec(0x53, "text", 0, Text, 0),
    spec(0x54, "raw", 0, Raw, 0),
    spec(0x55, "volume_storage", 4, Unsigned, 3),
    spec(0x56, "conductivity", 2, Unsigned, 0),
    spec(0x57, "temperature", 1, Signed, 0),
    spec(0x59, "count", 1, Signed, 0),
    spec(0x5A, "count", 2, Signed, 0),
    spec(0x5B, "count", 4, Signed, 0),
    spec(0x5C, "power", 4, Signed, 2),
    spec(0x5D, "current", 2, Signed, 3),
    spec(0x5E, "direction", 2, Unsigned, 2),
    spec(0x5F, "precipitation", 2, Unsigned, 1),
    spec(0x60, "channel", 1, Unsigned, 0),
    spec(0x61, "rotational_speed", 2, Unsigned, 0),
    spec(0xF0, "device_type_id", 2, Unsigned, 0),
    spec(0xF1, "firmware_version", 4, Version, 0),
    spec(0xF2, "firmware_version", 3, Version, 0),
];

pub fn lookup(id: u8) -> Option<&'static ObjectSpec> {
    OBJECTS.iter().find(|spec| spec.id == id)
}

fn read_unsigned(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn read_signed(bytes: &[u8]) -> i64 {
    let raw = read_unsigned(bytes);
    let bits = bytes.len() * 8;
    if bits == 0 || bits >= 64 {
        return raw as i64;
    }
    // Sign-extend from the top bit of the value.
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

fn scaled(raw: i64, decimals: u8) -> Value {
    if decimals == 0 {
        Value::Int(raw)
    } else {
        Value::Float(raw as f64 / 10f64.powi(i32::from(decimals)))
    }
}

/// Interpret little-endian `bytes` as `format`. `None` if text is not UTF-8.
pub fn value(format: Format, decimals: u8, bytes: &[u8]) -> Option<Value> {
    let value = match format {
        Format::Unsigned => scaled(read_unsigned(bytes) as i64, decimals),
        Format::Signed => scaled(read_signed(bytes), decimals),
        Format::Binary => Value::Bool(read_unsigned(bytes) != 0),
        Format::Text => Value::Text(std::str::from_utf8(bytes).ok()?.to_string()),
        Format::Raw => Value::Text(bytes.iter().map(|b| format!("{b:02x}")).collect()),
        Format::Version => Value::Text(
            bytes
                .iter()
                .rev()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join("."),
        ),
    };
    Some(value)
}
