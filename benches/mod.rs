use criterion::{criterion_group, criterion_main};

#[path = "../tests/common/mock.rs"]
#[allow(dead_code)]
mod mock;

criterion_group!(
    benches,
    protocol::bench_pack,
    protocol::bench_unpack,
    service::bench_frame_dispatch,
    service::bench_matop_round_trip
);
criterion_main!(benches);
