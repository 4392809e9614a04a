use criterion::{criterion_group, criterion_main};

mod config {
    pub mod document;
}

mod network {
    pub mod mqtt;
}

criterion_group!(
    benches,
    config::document::bench_to_json,
    config::document::bench_from_json,
    network::mqtt::bench_publish,
    network::mqtt::bench_poll
);
criterion_main!(benches);
