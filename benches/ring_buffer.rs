//! Criterion benchmarks for the channel history hot paths.
//!
//! Every accepted frame costs one `ChannelStore::push_frame`; display readers call
//! `snapshot` on each redraw. Both must stay flat as the buffers fill.
//!
//! Run with: cargo bench --bench ring_buffer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use netdaq::data::{ChannelStore, RingBuffer};
use netdaq::frame::{Channel, Frame, CHANNEL_COUNT};
use std::sync::Arc;
use std::thread;

/// Push cost with an empty buffer versus a full one that evicts on every push.
fn ring_buffer_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer_push");
    group.throughput(Throughput::Elements(1));

    for (name, prefill) in [("empty", 0usize), ("full", 20_000)] {
        let mut rb = RingBuffer::new(20_000);
        for i in 0..prefill {
            rb.push(i as f64);
        }
        group.bench_function(BenchmarkId::new("push", name), |b| {
            b.iter(|| rb.push(black_box(1.5)));
        });
    }

    group.finish();
}

/// One frame fanned out to all eight channels.
fn store_push_frame(c: &mut Criterion) {
    let store = ChannelStore::new(20_000);
    let frame = Frame::new([1.0; CHANNEL_COUNT]);

    c.bench_function("store_push_frame", |b| {
        b.iter(|| store.push_frame(black_box(&frame)));
    });
}

/// Snapshot latency at different fill levels.
fn store_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_snapshot");
    let channel = Channel::new(0).unwrap();

    for fill in [100usize, 5_000, 20_000] {
        let store = ChannelStore::new(20_000);
        for i in 0..fill {
            store.push_frame(&Frame::new([i as f64; CHANNEL_COUNT]));
        }

        group.throughput(Throughput::Elements(fill as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fill), &fill, |b, _| {
            b.iter(|| black_box(store.snapshot(channel)));
        });
    }

    group.finish();
}

/// Snapshots taken while a writer thread keeps pushing frames.
fn store_contended_snapshot(c: &mut Criterion) {
    let store = Arc::new(ChannelStore::new(20_000));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let writer = {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut i = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                store.push_frame(&Frame::new([i as f64; CHANNEL_COUNT]));
                i += 1;
            }
        })
    };

    c.bench_function("store_snapshot_all_contended", |b| {
        b.iter(|| black_box(store.snapshot_all()));
    });

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    writer.join().unwrap();
}

criterion_group!(
    benches,
    ring_buffer_push,
    store_push_frame,
    store_snapshot,
    store_contended_snapshot
);
criterion_main!(benches);
