use criterion::{Criterion, Throughput};
use nodehelper::config::Document;
use std::hint::black_box;

fn settings() -> Document {
    let mut doc = Document::new();
    doc.insert("mqtt_server", "broker.local").unwrap();
    doc.insert("mqtt_port", 1883).unwrap();
    doc.insert("mqtt_user", "blind-livingroom").unwrap();
    doc.insert("mqtt_pwd", "correct horse battery staple").unwrap();
    doc.insert("steps_per_rev", 4096).unwrap();
    doc.insert("max_position", 102_400).unwrap();
    doc.insert("inverted", false).unwrap();
    doc.insert("speed", 0.85).unwrap();
    doc.insert("name", "Living room \"east\"").unwrap();
    doc
}

pub fn bench_to_json(c: &mut Criterion) {
    let doc = settings();
    let len = doc.to_json().unwrap().len();

    let mut group = c.benchmark_group("document");
    group.throughput(Throughput::Bytes(len as u64));
    group.bench_function("to_json", |b| {
        b.iter(|| black_box(&doc).to_json().unwrap())
    });
    group.finish();
}

pub fn bench_from_json(c: &mut Criterion) {
    let json = settings().to_json().unwrap();

    let mut group = c.benchmark_group("document");
    group.throughput(Throughput::Bytes(json.len() as u64));
    group.bench_function("from_json", |b| {
        b.iter(|| Document::from_json(black_box(json.as_bytes())).unwrap())
    });
    group.finish();
}
