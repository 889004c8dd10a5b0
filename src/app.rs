//! Core application runner for `bthome-listener`.
//!
//! This module is decoupled from CLI parsing and process exit codes so it can
//! be tested deterministically with an injected scanner and output streams.

use crate::config::{ConfigError, ParserConfig};
use crate::decoder::BthomeDecoder;
use crate::output::{self, Format, OutputFormatter, Record};
use crate::router::{Parser, Rejection};
use crate::scanner::{Backend, ScanError, ScanEvent};
use crate::throttle::Throttle;
use clap::ArgAction;
use std::future::Future;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Decode BTHome sensor advertisements and track whitelisted devices.
#[derive(clap::Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// TOML file with whitelists, encryption keys and reporting options.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// Measurement name written by `--format influxdb`.
    #[arg(long, default_value = "bthome")]
    pub influxdb_measurement: String,

    /// Emit at most one sensor record per device in this interval
    /// (e.g. 30s, 5m, 250ms; a bare number is seconds). Tracker records
    /// are never held back.
    #[arg(long, value_parser = crate::throttle::parse_duration)]
    pub throttle: Option<Duration>,

    /// Where advertisements come from.
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Verbose output: print rejected advertisements to stderr and raise
    /// the log level. Repeat for more detail.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Only report sensors in the sensor whitelist.
    #[arg(long)]
    pub no_discovery: bool,
}

impl Options {
    /// Load the session configuration and apply command line overrides.
    pub fn parser_config(&self) -> Result<ParserConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ParserConfig::from_file(path)?,
            None => ParserConfig::default(),
        };
        if self.no_discovery {
            config.discovery = false;
        }
        Ok(config)
    }
}

/// Errors that end a run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Source of scan events. Tests substitute a scripted implementation.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ScanEvent>, ScanError>> + Send + '_>>;
}

/// Scans with the compiled-in back-ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ScanEvent>, ScanError>> + Send + '_>>
    {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

fn write_record(
    formatter: &dyn OutputFormatter,
    record: &Record,
    out: &mut dyn Write,
) -> io::Result<()> {
    let line = formatter.format(record);
    if line.is_empty() {
        return Ok(());
    }
    writeln!(out, "{line}")
}

/// Rejections worth showing to a user running with `--verbose`.
fn is_reportable(rejection: &Rejection) -> bool {
    matches!(
        rejection,
        Rejection::Malformed(_) | Rejection::DecodeFailure { .. }
    )
}

/// Run the core processing loop, writing records to `out` and verbose rejections to `err`.
///
/// - Sensor records are throttled per MAC when `options.throttle` is set.
/// - Tracker records are never throttled.
/// - Malformed reports and decode failures are written to `err` only when verbose.
pub async fn run_with_io(
    options: Options,
    config: ParserConfig,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let formatter = output::formatter(options.format, &options.influxdb_measurement);
    let parser = Parser::new(config);
    let mut decoder = BthomeDecoder::new();
    let mut throttle = options.throttle.map(Throttle::new);

    let mut events = scanner.start_scan(options.backend).await?;
    debug!(backend = %options.backend, "Scanning started");

    while let Some(event) = events.recv().await {
        let timestamp = SystemTime::now();
        let outcome = parser.ingest(event, &mut decoder);

        match (outcome.sensor, outcome.mac) {
            (Ok(data), Some(mac)) => {
                let should_emit = throttle.as_mut().is_none_or(|t| t.should_emit(mac));
                if should_emit {
                    let record = Record::Sensor {
                        mac,
                        timestamp,
                        data,
                    };
                    write_record(formatter.as_ref(), &record, out)?;
                }
            }
            (Ok(_), None) => {}
            (Err(rejection), _) => {
                if options.verbose > 0 && is_reportable(&rejection) {
                    writeln!(err, "{rejection}")?;
                }
            }
        }

        if let Some(data) = outcome.tracker {
            write_record(formatter.as_ref(), &Record::Tracker { timestamp, data }, out)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ad::{AD_TYPE_COMPLETE_NAME, AD_TYPE_SERVICE_DATA_UUID16};
    use crate::test_utils::{TEST_MAC, ad_element, legacy_report};
    use clap::Parser as _;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FakeScanner {
        events: Mutex<Vec<ScanEvent>>,
    }

    impl FakeScanner {
        fn new(events: Vec<ScanEvent>) -> Self {
            Self {
                events: Mutex::new(events),
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _backend: Backend,
        ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ScanEvent>, ScanError>> + Send + '_>>
        {
            let events = self.events.lock().unwrap().clone();
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<ScanEvent>(events.len().max(1));
                tokio::spawn(async move {
                    for event in events {
                        let _ = tx.send(event).await;
                    }
                    // dropping tx closes the channel
                });
                Ok(rx)
            })
        }
    }

    /// BTHome v2 report: temperature 21.5 °C.
    fn temperature_report() -> ScanEvent {
        let mut payload = ad_element(AD_TYPE_COMPLETE_NAME, b"ATC_1234");
        payload.extend(ad_element(
            AD_TYPE_SERVICE_DATA_UUID16,
            &[0xD2, 0xFC, 0x40, 0x02, 0x66, 0x08],
        ));
        ScanEvent::Raw(legacy_report(TEST_MAC, -60, &payload))
    }

    fn options(args: &[&str]) -> Options {
        Options::parse_from(std::iter::once("bthome-listener").chain(args.iter().copied()))
    }

    async fn run(
        options: Options,
        config: ParserConfig,
        events: Vec<ScanEvent>,
    ) -> (String, String) {
        let scanner = FakeScanner::new(events);
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(options, config, &scanner, &mut out, &mut err)
            .await
            .unwrap();
        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[test]
    fn options_defaults() {
        let options = options(&[]);
        assert_eq!(options.format, Format::Json);
        assert_eq!(options.influxdb_measurement, "bthome");
        assert_eq!(options.verbose, 0);
        assert!(options.throttle.is_none());
        assert!(options.parser_config().unwrap().discovery);
    }

    #[test]
    #[cfg(feature = "hci")]
    fn options_flags() {
        let options = options(&[
            "--format",
            "influxdb",
            "--throttle",
            "5s",
            "--backend",
            "hci",
            "-vv",
            "--no-discovery",
        ]);
        assert_eq!(options.format, Format::Influxdb);
        assert_eq!(options.throttle, Some(Duration::from_secs(5)));
        assert_eq!(options.backend, Backend::Hci);
        assert_eq!(options.verbose, 2);
        assert!(!options.parser_config().unwrap().discovery);
    }

    #[test]
    fn options_missing_config_file() {
        let options = options(&["--config", "/nonexistent/bthome.toml"]);
        assert!(matches!(options.parser_config(), Err(ConfigError::Io { .. })));
    }

    #[tokio::test]
    async fn run_writes_sensor_records_to_out() {
        let (out, err) = run(
            options(&[]),
            ParserConfig::default(),
            vec![temperature_report()],
        )
        .await;

        assert!(err.is_empty());
        assert_eq!(out.lines().count(), 1);
        let line: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(line["type"], "sensor");
        assert_eq!(line["mac"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(line["data"]["temperature"], 21.5);
        assert_eq!(line["data"]["rssi"], -60);
        assert_eq!(line["data"]["local_name"], "ATC_1234");
        assert_eq!(line["data"]["firmware"], "BTHome V2");
        assert!(out.ends_with('\n'));
    }

    #[tokio::test]
    async fn run_writes_influxdb_lines() {
        let (out, _) = run(
            options(&["--format", "influxdb", "--influxdb-measurement", "sensors"]),
            ParserConfig::default(),
            vec![temperature_report()],
        )
        .await;

        assert!(out.starts_with("sensors,mac=AA:BB:CC:DD:EE:FF,record=sensor "));
        assert!(out.contains("temperature=21.5"));
        assert!(out.contains("rssi=-60i"));
    }

    #[tokio::test]
    async fn run_applies_throttle() {
        let (out, _) = run(
            options(&["--throttle", "1h"]),
            ParserConfig::default(),
            vec![temperature_report(), temperature_report()],
        )
        .await;

        // no waiting in the test, so the second report is within the interval
        assert_eq!(out.lines().count(), 1);
    }

    #[tokio::test]
    async fn run_writes_tracker_records_unthrottled() {
        let mut config = ParserConfig::default();
        config.discovery = false;
        config.tracker_whitelist.insert(TEST_MAC.into());

        let (out, _) = run(
            options(&["--throttle", "1h"]),
            config,
            vec![temperature_report(), temperature_report()],
        )
        .await;

        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line["type"] == "tracker"));
        assert_eq!(lines[0]["data"]["mac"], "AABBCCDDEEFF");
        assert_eq!(lines[0]["data"]["is_connected"], true);
    }

    #[tokio::test]
    async fn run_prints_rejections_only_when_verbose() {
        let mut truncated = match temperature_report() {
            ScanEvent::Raw(raw) => raw,
            ScanEvent::Fields(_) => unreachable!(),
        };
        truncated.pop();
        let events = vec![ScanEvent::Raw(truncated)];

        let (out, err) = run(options(&[]), ParserConfig::default(), events.clone()).await;
        assert!(out.is_empty());
        assert!(err.is_empty());

        let (out, err) = run(options(&["-v"]), ParserConfig::default(), events).await;
        assert!(out.is_empty());
        assert!(err.starts_with("malformed report"));
    }

    #[tokio::test]
    async fn run_accepts_field_events() {
        let fields = crate::advertisement::AdvertisementFields {
            address: "AA:BB:CC:DD:EE:FF".into(),
            rssi: Some(-55),
            local_name: None,
            service_data: vec![(0xFCD2, vec![0x40, 0x01, 0x5A])],
            ..Default::default()
        };
        let (out, _) = run(
            options(&[]),
            ParserConfig::default(),
            vec![ScanEvent::Fields(fields)],
        )
        .await;

        let line: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(line["data"]["battery"], 90);
        assert_eq!(line["data"]["rssi"], -55);
        assert_eq!(line["data"]["local_name"], "");
    }

    #[tokio::test]
    async fn run_keeps_device_timestamp_apart_from_receive_time() {
        // BTHome v2 timestamp object 0x50: 1_700_000_000 s
        let payload = ad_element(
            AD_TYPE_SERVICE_DATA_UUID16,
            &[0xD2, 0xFC, 0x40, 0x50, 0x00, 0xF1, 0x53, 0x65],
        );
        let report = ScanEvent::Raw(legacy_report(TEST_MAC, -60, &payload));
        let (out, _) = run(options(&[]), ParserConfig::default(), vec![report]).await;

        let line: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(line["data"]["timestamp"], 1_700_000_000);
        let received = line["timestamp"].as_u64().unwrap();
        assert!(received > 1_700_000_000_000, "receive time in ms, got {received}");
    }
}
