//! Benchmarks for telemetry recording and publication
//!
//! - per-packet counter updates on the current slice
//! - slice rotation with link-quality computation
//! - layout encode and shared-region publish for OSD readers
//!
//! Platform: Cross-platform (region lives in a temp dir)

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use groundlink::telemetry::{PacketEvent, RuntimeInfoStore, TelemetryReader, TelemetryRegion, layout};
use std::hint::black_box;

/// A store with every slice carrying realistic traffic.
fn busy_store() -> RuntimeInfoStore {
    let mut store = RuntimeInfoStore::new(100, 0);
    for slice in 0..40u64 {
        for n in 0..200u16 {
            let interface = usize::from(n % 2);
            store.record_packet_event(interface, PacketEvent::Video);
            store.record_radio_sample(interface, 0, -60 - (n % 15) as i16, -95);
            if n % 50 == 0 {
                store.record_packet_event(interface, PacketEvent::Missing(2));
            }
        }
        store.record_block_output(8, 1);
        store.advance_if_due((slice + 1) * 100);
    }
    store
}

fn bench_recording(c: &mut Criterion) {
    let mut group = c.benchmark_group("telemetry_recording");
    group.throughput(Throughput::Elements(1));

    group.bench_function("video_event", |b| {
        let mut store = RuntimeInfoStore::new(100, 0);
        b.iter(|| store.record_packet_event(black_box(0), black_box(PacketEvent::Video)))
    });

    group.bench_function("radio_sample", |b| {
        let mut store = RuntimeInfoStore::new(100, 0);
        b.iter(|| store.record_radio_sample(black_box(1), black_box(0), black_box(-64), black_box(-92)))
    });

    group.bench_function("slice_rotation", |b| {
        b.iter_batched(
            busy_store,
            |mut store| {
                let now = 4_100;
                black_box(store.advance_if_due(now))
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_publication(c: &mut Criterion) {
    let store = busy_store();
    let encoded = layout::encode_to_vec(&store).expect("store encodes");

    let mut group = c.benchmark_group("telemetry_publication");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("layout_encode", |b| {
        let mut out = vec![0u8; encoded.len()];
        b.iter(|| layout::encode(black_box(&store), &mut out).expect("fits"))
    });

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("rtinfo");
    let mut region = TelemetryRegion::create(&path).expect("region created");
    group.bench_function("region_publish", |b| {
        b.iter(|| region.publish(black_box(&store)).expect("published"))
    });

    let reader = TelemetryReader::attach(&path).expect("reader attaches");
    group.bench_function("reader_snapshot", |b| b.iter(|| black_box(reader.snapshot().expect("consistent"))));

    group.finish();
}

criterion_group!(benches, bench_recording, bench_publication);
criterion_main!(benches);
