//! Benchmarks for block reassembly
//!
//! Covers the receive hot path:
//! - complete blocks arriving in order (no EC work)
//! - blocks with one lost data shard rebuilt from EC
//! - raw Cauchy decode for a worst-case loss pattern
//!
//! Platform: Cross-platform (synthetic blocks, CI-safe)

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use groundlink::RuntimeInfoStore;
use groundlink::packet::VideoPacket;
use groundlink::test_utils::{BlockBuilder, RecordingLink, reassembler};
use groundlink::video::fec::{CauchyCodec, ErasureCodec};
use groundlink::video::{DeliveredPacket, ReassemblyIo};
use std::hint::black_box;

const BLOCKS: u32 = 64;
const DATA: u8 = 8;
const EC: u8 = 2;
const SHARD: u16 = 1024;

fn blocks(drop_first_data: bool) -> Vec<VideoPacket> {
    (0..BLOCKS)
        .flat_map(|block| {
            BlockBuilder::new(block, DATA, EC)
                .shard_size(SHARD)
                .build()
                .packets
                .into_iter()
                .filter(move |p| !(drop_first_data && p.video.packet_index == 0))
        })
        .collect()
}

fn feed_all(packets: &[VideoPacket]) -> usize {
    let mut store = RuntimeInfoStore::new(100, 0);
    let link = RecordingLink::default();
    let mut sink: Vec<DeliveredPacket> = Vec::with_capacity(packets.len());
    let mut reassembler = reassembler(0x1001, 0);
    for (i, packet) in packets.iter().enumerate() {
        let mut io = ReassemblyIo::new(i as u64 / 16, &mut store, &link, &mut sink);
        black_box(reassembler.handle_packet(0, packet, &mut io));
    }
    sink.len()
}

fn bench_in_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    group.throughput(Throughput::Elements(u64::from(BLOCKS)));

    let clean = blocks(false);
    group.bench_function("complete_blocks", |b| {
        b.iter_batched(|| clean.clone(), |packets| feed_all(black_box(&packets)), BatchSize::SmallInput)
    });

    let lossy = blocks(true);
    group.bench_function("one_loss_per_block", |b| {
        b.iter_batched(|| lossy.clone(), |packets| feed_all(black_box(&packets)), BatchSize::SmallInput)
    });

    group.finish();
}

fn bench_cauchy_decode(c: &mut Criterion) {
    let block = BlockBuilder::new(0, DATA, EC).shard_size(SHARD).build();
    let shards: Vec<Option<Vec<u8>>> = block
        .packets
        .iter()
        .map(|p| (p.video.packet_index >= EC).then(|| p.shard.to_vec()))
        .collect();

    let mut group = c.benchmark_group("fec");
    group.throughput(Throughput::Bytes(u64::from(DATA) * u64::from(SHARD)));
    group.bench_function("rebuild_two_data_shards", |b| {
        b.iter_batched(
            || shards.clone(),
            |mut shards| {
                CauchyCodec.reconstruct(usize::from(DATA), usize::from(EC), black_box(&mut shards)).ok();
                shards
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_in_order, bench_cauchy_decode);
criterion_main!(benches);
