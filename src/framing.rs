//! Validation of raw HCI LE advertising report events.
//!
//! The buffer is the whole HCI event as read from the socket:
//!
//! ```text
//! legacy   (sub-event 0x02): 04 3E len 02 n type atype [addr;6] ad_len [ad..] rssi
//! extended (sub-event 0x0D): 04 3E len 0D n [type;2] atype [addr;6] phy1 phy2 sid tx rssi
//!                            [interval;2] datype [daddr;6] ad_len [ad..]
//! ```

use crate::mac_address::MacAddress;
use thiserror::Error;

/// Offset of the LE meta sub-event code.
const SUBEVENT_OFFSET: usize = 3;
/// Offset of the HCI parameter total length.
const PARAM_LENGTH_OFFSET: usize = 2;
/// Bytes preceding the parameters: packet type, event code, parameter length.
const HCI_HEADER_LEN: usize = 3;

/// LE Extended Advertising Report sub-event code.
pub const EXTENDED_REPORT_SUBEVENT: u8 = 0x0D;

const LEGACY_AD_START: usize = 14;
const EXTENDED_AD_START: usize = 29;
const LEGACY_ADDR_OFFSET: usize = 7;
const EXTENDED_ADDR_OFFSET: usize = 8;
const EXTENDED_RSSI_OFFSET: usize = 18;

/// Reasons a report fails validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedReport {
    #[error("report too short: {len} bytes")]
    Truncated { len: usize },
    #[error("declared length {declared} does not end after the AD payload start {start}")]
    HeaderOnly { declared: usize, start: usize },
    #[error("declared length {declared} differs from buffer length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("AD payload size {payload} inconsistent with declared length {declared}")]
    PayloadSizeMismatch { declared: usize, payload: usize },
    #[error("invalid device address: {0}")]
    InvalidAddress(String),
}

/// Kind of advertising report, decided by the sub-event byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Legacy,
    Extended,
}

impl ReportKind {
    fn ad_start(self) -> usize {
        match self {
            ReportKind::Legacy => LEGACY_AD_START,
            ReportKind::Extended => EXTENDED_AD_START,
        }
    }

    /// Legacy reports carry RSSI as a trailing byte after the AD payload.
    fn trailer(self) -> usize {
        match self {
            ReportKind::Legacy => 1,
            ReportKind::Extended => 0,
        }
    }
}

/// The fields of a report that passed framing validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub kind: ReportKind,
    pub mac: MacAddress,
    pub rssi: i8,
    pub payload: &'a [u8],
}

/// Reinterpret a raw RSSI byte as a signed value.
pub fn normalize_rssi(raw: u8) -> i8 {
    raw as i8
}

/// Validate a raw report and split out address, RSSI and AD payload.
///
/// Never panics; any inconsistency is returned as [`MalformedReport`].
pub fn validate(raw: &[u8]) -> Result<Frame<'_>, MalformedReport> {
    let truncated = MalformedReport::Truncated { len: raw.len() };

    let kind = match raw.get(SUBEVENT_OFFSET) {
        Some(&EXTENDED_REPORT_SUBEVENT) => ReportKind::Extended,
        Some(_) => ReportKind::Legacy,
        None => return Err(truncated),
    };
    let start = kind.ad_start();
    let payload_size = usize::from(*raw.get(start - 1).ok_or(truncated)?);
    let declared = usize::from(raw[PARAM_LENGTH_OFFSET]) + HCI_HEADER_LEN;

    if declared <= start {
        return Err(MalformedReport::HeaderOnly { declared, start });
    }
    if declared != raw.len() {
        return Err(MalformedReport::LengthMismatch {
            declared,
            actual: raw.len(),
        });
    }
    if declared != start + payload_size + kind.trailer() {
        return Err(MalformedReport::PayloadSizeMismatch {
            declared,
            payload: payload_size,
        });
    }

    let (rssi_index, addr_offset) = match kind {
        ReportKind::Extended => (EXTENDED_RSSI_OFFSET, EXTENDED_ADDR_OFFSET),
        ReportKind::Legacy => (declared - 1, LEGACY_ADDR_OFFSET),
    };
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&raw[addr_offset..addr_offset + 6]);

    Ok(Frame {
        kind,
        mac: MacAddress::from_le_bytes(addr),
        rssi: normalize_rssi(raw[rssi_index]),
        payload: &raw[start..start + payload_size],
    })
}
