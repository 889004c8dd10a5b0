use crate::ad::AdElement;
use crate::mac_address::MacAddress;
use std::io;
use std::sync::{Arc, Mutex};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Encode one AD structure: length, type, value.
pub fn ad_element(ad_type: u8, value: &[u8]) -> Vec<u8> {
    AdElement::encode(ad_type, value)
        .expect("AD value too long")
        .as_bytes()
        .to_vec()
}

/// Address bytes in HCI wire order.
fn wire_address(mac: MacAddress) -> [u8; 6] {
    let mut addr = mac.0;
    addr.reverse();
    addr
}

/// Build a self-consistent HCI LE Advertising Report event (sub-event 0x02).
pub fn legacy_report(mac: MacAddress, rssi: i8, payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![
        0x04, // HCI event packet
        0x3E, // LE meta event
        0x00, // parameter length, patched below
        0x02, // advertising report
        0x01, // one report
        0x00, // ADV_IND
        0x00, // public address
    ];
    raw.extend(wire_address(mac));
    raw.push(payload.len() as u8);
    raw.extend_from_slice(payload);
    raw.push(rssi as u8);
    raw[2] = (raw.len() - 3) as u8;
    raw
}

/// Build a self-consistent HCI LE Extended Advertising Report event (sub-event 0x0D).
pub fn extended_report(mac: MacAddress, rssi: i8, payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![
        0x04, // HCI event packet
        0x3E, // LE meta event
        0x00, // parameter length, patched below
        0x0D, // extended advertising report
        0x01, // one report
        0x13, 0x00, // legacy ADV_IND event type
        0x00, // public address
    ];
    raw.extend(wire_address(mac));
    raw.extend([
        0x01, // primary PHY
        0x00, // secondary PHY
        0xFF, // SID
        0x7F, // TX power unavailable
        rssi as u8,
        0x00, 0x00, // periodic advertising interval
        0x00, // direct address type
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // direct address
    ]);
    raw.push(payload.len() as u8);
    raw.extend_from_slice(payload);
    raw[2] = (raw.len() - 3) as u8;
    raw
}

/// Shared buffer that a test subscriber writes formatted events into.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber and return its result together
/// with every `info!` (and above) event it logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .without_time()
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    (result, logs)
}
