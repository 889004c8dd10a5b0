//! Passive LE scanning over a raw Linux HCI socket.
//!
//! Talks to the controller directly instead of going through bluetoothd, so
//! the process needs CAP_NET_RAW and CAP_NET_ADMIN (or root). Advertising
//! report events are forwarded untouched; [`crate::framing`] validates them.

use super::{EVENT_CHANNEL_BUFFER_SIZE, ScanError, ScanEvent};
use crate::framing::EXTENDED_REPORT_SUBEVENT;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_DEV: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const LEGACY_REPORT_SUBEVENT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const OWN_ADDRESS_PUBLIC: u8 = 0x00;
const ACCEPT_ALL_ADVERTISERS: u8 = 0x00;

/// 10 ms, in 0.625 ms controller units.
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

/// Largest HCI event: header plus 255 parameter bytes.
const MAX_EVENT_LEN: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// Kernel-side packet filter (`struct hci_filter`).
#[repr(C)]
#[derive(Debug, PartialEq, Eq)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// Pass LE Meta events and nothing else.
    const fn le_meta_events() -> Self {
        let mut event_mask = [0u32; 2];
        let bit = EVT_LE_META_EVENT as usize;
        event_mask[bit / 32] = 1 << (bit % 32);
        Self {
            type_mask: 1 << HCI_EVENT_PKT,
            event_mask,
            opcode: 0,
        }
    }
}

const fn le_opcode(ocf: u16) -> u16 {
    (OGF_LE_CTL << 10) | ocf
}

/// Frame a command: packet type, opcode LE, parameter length, parameters.
fn command_packet(opcode: u16, params: &[u8]) -> Vec<u8> {
    let [op_lo, op_hi] = opcode.to_le_bytes();
    let mut packet = vec![HCI_COMMAND_PKT, op_lo, op_hi, params.len() as u8];
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters, in wire order.
fn scan_parameters(interval: u16, window: u16) -> [u8; 7] {
    let [interval_lo, interval_hi] = interval.to_le_bytes();
    let [window_lo, window_hi] = window.to_le_bytes();
    [
        LE_SCAN_PASSIVE,
        interval_lo,
        interval_hi,
        window_lo,
        window_hi,
        OWN_ADDRESS_PUBLIC,
        ACCEPT_ALL_ADVERTISERS,
    ]
}

fn os_error(action: &str) -> ScanError {
    ScanError::Bluetooth(format!("{action}: {}", io::Error::last_os_error()))
}

/// A non-blocking raw socket bound to one HCI device.
struct HciSocket(OwnedFd);

impl HciSocket {
    fn open(dev: u16) -> Result<Self, ScanError> {
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(os_error("HCI socket"));
        }
        let socket = Self(unsafe { OwnedFd::from_raw_fd(fd) });

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                (&addr as *const SockaddrHci).cast::<sockaddr>(),
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error(&format!("bind hci{dev}")));
        }
        Ok(socket)
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                (filter as *const HciFilter).cast::<c_void>(),
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("HCI filter"));
        }
        Ok(())
    }

    fn send_command(&self, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = command_packet(le_opcode(ocf), params);
        let ret = unsafe { libc::write(self.as_raw_fd(), packet.as_ptr().cast(), packet.len()) };
        if ret < 0 {
            return Err(os_error("HCI command"));
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let ret = unsafe { libc::read(self.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret as usize)
        }
    }
}

impl AsRawFd for HciSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Whether an event is a legacy or extended LE advertising report.
fn is_advertising_report(packet: &[u8]) -> bool {
    matches!(
        packet,
        [HCI_EVENT_PKT, EVT_LE_META_EVENT, _, LEGACY_REPORT_SUBEVENT | EXTENDED_REPORT_SUBEVENT, ..]
    )
}

/// Start a passive LE scan on hci0.
///
/// Every advertising report event is forwarded as [`ScanEvent::Raw`].
/// Scanning runs without controller-side duplicate filtering so repeated
/// broadcasts from the same sensor all arrive.
pub async fn start_scan() -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
    let events = HciSocket::open(HCI_DEV)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    let commands = HciSocket::open(HCI_DEV)?;
    commands.send_command(
        OCF_LE_SET_SCAN_PARAMETERS,
        &scan_parameters(SCAN_INTERVAL, SCAN_WINDOW),
    )?;
    // enable, no duplicate filtering
    commands.send_command(OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00])?;
    info!("Passive LE scan enabled on hci{HCI_DEV}");

    let events = AsyncFd::new(events)
        .map_err(|e| ScanError::Bluetooth(format!("HCI socket registration: {e}")))?;
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        // held for the lifetime of the reader
        let _commands = commands;
        let mut buf = [0u8; MAX_EVENT_LEN];

        loop {
            let mut guard = match events.readable().await {
                Ok(guard) => guard,
                Err(error) => {
                    warn!(%error, "HCI socket no longer readable");
                    return;
                }
            };

            loop {
                let len = match guard.try_io(|socket| socket.get_ref().read(&mut buf)) {
                    Ok(Ok(0)) | Err(_) => break,
                    Ok(Ok(len)) => len,
                    Ok(Err(error)) => {
                        warn!(%error, "HCI read failed");
                        break;
                    }
                };

                let packet = &buf[..len];
                if !is_advertising_report(packet) {
                    continue;
                }
                trace!(len, "HCI advertising report");
                if tx.send(ScanEvent::Raw(packet.to_vec())).await.is_err() {
                    debug!("Scan event receiver dropped, stopping HCI scan");
                    return;
                }
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, extended_report, legacy_report};

    #[test]
    fn test_filter_passes_only_le_meta_events() {
        let filter = HciFilter::le_meta_events();
        assert_eq!(filter.type_mask, 0b1_0000);
        // 0x3E is bit 30 of the second word
        assert_eq!(filter.event_mask, [0, 1 << 30]);
        assert_eq!(filter.opcode, 0);
    }

    #[test]
    fn test_scan_enable_command_bytes() {
        let packet = command_packet(le_opcode(OCF_LE_SET_SCAN_ENABLE), &[0x01, 0x00]);
        assert_eq!(packet, vec![0x01, 0x0C, 0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_scan_parameters_layout() {
        assert_eq!(
            scan_parameters(0x0010, 0x0020),
            [0x00, 0x10, 0x00, 0x20, 0x00, 0x00, 0x00]
        );
        let packet = command_packet(
            le_opcode(OCF_LE_SET_SCAN_PARAMETERS),
            &scan_parameters(SCAN_INTERVAL, SCAN_WINDOW),
        );
        assert_eq!(&packet[..4], &[0x01, 0x0B, 0x20, 0x07]);
    }

    #[test]
    fn test_advertising_reports_are_forwarded() {
        assert!(is_advertising_report(&legacy_report(TEST_MAC, -60, &[])));
        assert!(is_advertising_report(&extended_report(TEST_MAC, -60, &[])));

        // LE connection complete, command complete, truncated
        assert!(!is_advertising_report(&[0x04, 0x3E, 0x13, 0x01]));
        assert!(!is_advertising_report(&[0x04, 0x0E, 0x04, 0x01]));
        assert!(!is_advertising_report(&[0x04, 0x3E, 0x00]));
    }
}
