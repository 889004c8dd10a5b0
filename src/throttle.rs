//! Per-device rate limiting of emitted sensor records.
//!
//! BTHome devices often advertise several times per second while their
//! readings change slowly. The throttle lets at most one record per device
//! through in each interval.

use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Remembers when each device last had a record let through.
///
/// ```
/// use bthome_listener::{MacAddress, Throttle};
/// use std::time::Duration;
///
/// let mut throttle = Throttle::new(Duration::from_secs(60));
/// let mac = MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x00, 0x01]);
/// assert!(throttle.should_emit(mac));
/// assert!(!throttle.should_emit(mac));
/// ```
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    emitted: HashMap<MacAddress, Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            emitted: HashMap::new(),
        }
    }

    /// Whether a record from `mac` may be emitted now. Only a `true` answer
    /// starts a new interval for that device.
    pub fn should_emit(&mut self, mac: MacAddress) -> bool {
        self.should_emit_at(mac, Instant::now())
    }

    fn should_emit_at(&mut self, mac: MacAddress, now: Instant) -> bool {
        if let Some(previous) = self.emitted.get(&mac)
            && now.duration_since(*previous) < self.interval
        {
            return false;
        }
        self.emitted.insert(mac, now);
        true
    }
}

/// Parse a `--throttle` value such as `30s`, `5m`, `1h` or `250ms`.
/// A bare number is taken as seconds.
///
/// ```
/// use bthome_listener::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
/// assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
/// assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration".to_string());
    }

    // "ms" before "m" and "s"
    let units: [(&str, &str, u64); 4] = [
        ("ms", "milliseconds", 1),
        ("h", "hours", 3_600_000),
        ("m", "minutes", 60_000),
        ("s", "seconds", 1000),
    ];
    let (count, unit, millis_per_unit) = units
        .iter()
        .find_map(|&(suffix, unit, millis)| {
            src.strip_suffix(suffix).map(|count| (count.trim(), unit, millis))
        })
        .unwrap_or((src, "seconds", 1000));

    let count: u64 = count
        .parse()
        .map_err(|_| format!("invalid {unit} in duration '{src}'"))?;
    count
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration too long: {src}"))
}
