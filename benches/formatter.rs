//! Benchmark suite for the output formatters.
//!
//! Isolates formatter performance from async runtime overhead.

use bthome_listener::{
    InfluxDbFormatter, JsonFormatter, MacAddress, OutputFormatter, Record, SensorData, TrackerData,
    Value,
};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::SystemTime;

const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Typical climate sensor record
fn sensor_record() -> Record {
    let data: SensorData = [
        ("temperature", Value::Float(21.5)),
        ("humidity", Value::Float(50.55)),
        ("battery", Value::Int(100)),
        ("packet", Value::Int(17)),
        ("firmware", Value::from("BTHome V2")),
        ("trigger_based", Value::Bool(false)),
        ("rssi", Value::Int(-60)),
        ("local_name", Value::from("ATC_1234")),
    ]
    .into_iter()
    .collect();
    Record::Sensor {
        mac: TEST_MAC,
        timestamp: SystemTime::UNIX_EPOCH,
        data,
    }
}

fn tracker_record() -> Record {
    Record::Tracker {
        timestamp: SystemTime::UNIX_EPOCH,
        data: TrackerData {
            tracker_id: None,
            mac: TEST_MAC.to_unformatted(),
            is_connected: true,
            rssi: -70,
            local_name: "phone".to_string(),
        },
    }
}

fn bench_formatters(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_record");
    let formatters: [(&str, Box<dyn OutputFormatter>); 2] = [
        ("json", Box::new(JsonFormatter)),
        (
            "influxdb",
            Box::new(InfluxDbFormatter::new("bthome".to_string())),
        ),
    ];
    let records = [("sensor", sensor_record()), ("tracker", tracker_record())];

    group.throughput(Throughput::Elements(1));
    for (format, formatter) in &formatters {
        for (kind, record) in &records {
            group.bench_function(format!("{format}/{kind}"), |b| {
                b.iter(|| black_box(formatter.format(black_box(record))))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_formatters);
criterion_main!(benches);
