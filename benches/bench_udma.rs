// UDMA Descriptor-Ring Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Benchmarks of the descriptor-ring path against plain software loops.
//!
//! The offload side runs against the in-crate device model, so the numbers
//! measure ring/compiler overhead (descriptor encode, doorbell, completion
//! scan), not accelerator throughput.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use udma_rust::buffer::DmaBuf;
use udma_rust::engine::UdmaEngine;
use udma_rust::mem::MemTransaction;
use udma_rust::opcode::MemOpcode;
use udma_rust::queue::{EngineRev, QueueType};
use udma_rust::sim::{QueueMem, SimDevice, SimRegs};

fn setup() -> (UdmaEngine<SimRegs>, SimDevice, QueueMem) {
    let mem = QueueMem::alloc(256, 16);
    let mut engine = UdmaEngine::new(SimRegs::new());
    engine
        .add_queue(&mem.config(0, QueueType::MemCrc, EngineRev::Rev2, None))
        .unwrap();
    let dev = SimDevice::new(&mem, 0, QueueType::MemCrc);
    (engine, dev, mem)
}

/// One full copy transaction: prepare, doorbell, device pass, poll, ack.
fn ring_copy(engine: &mut UdmaEngine<SimRegs>, dev: &mut SimDevice, src: &[u8], dst: &[u8]) {
    let srcs: Vec<DmaBuf> = src
        .chunks(0xF000)
        .map(|c| DmaBuf::new(c.as_ptr() as u64, c.len() as u32))
        .collect();
    let dsts: Vec<DmaBuf> = dst
        .chunks(0xF000)
        .map(|c| DmaBuf::new(c.as_ptr() as u64, c.len() as u32))
        .collect();
    let mut txn = MemTransaction::new(MemOpcode::Copy, &srcs, &dsts);
    let used = engine.prepare_mem(0, &mut txn).unwrap();
    engine.submit(0, used);
    dev.process(engine.regs());
    let pkt = engine.poll(0).unwrap();
    engine.acknowledge(0, pkt.descs);
}

fn ring_crc32(engine: &mut UdmaEngine<SimRegs>, dev: &mut SimDevice, data: &[u8]) -> u32 {
    let srcs: Vec<DmaBuf> = data
        .chunks(0xF000)
        .map(|c| DmaBuf::new(c.as_ptr() as u64, c.len() as u32))
        .collect();
    let mut txn = MemTransaction::new(MemOpcode::Crc32, &srcs, &[]);
    let used = engine.prepare_mem(0, &mut txn).unwrap();
    engine.submit(0, used);
    dev.process(engine.regs());
    let pkt = engine.poll(0).unwrap();
    engine.acknowledge(0, pkt.descs);
    pkt.result.0
}

/// Benchmark CRC32: plain crc32fast vs the full ring round trip.
fn bench_crc32(c: &mut Criterion) {
    let sizes: Vec<usize> = vec![
        1024,        // 1 KB
        16 * 1024,   // 16 KB
        64 * 1024,   // 64 KB
        256 * 1024,  // 256 KB
        1024 * 1024, // 1 MB
    ];

    let mut group = c.benchmark_group("crc32");
    let (mut engine, mut dev, _mem) = setup();

    for size in sizes {
        let data: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();

        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("crc32fast", size), &data, |b, data| {
            b.iter(|| crc32fast::hash(data));
        });

        group.bench_with_input(BenchmarkId::new("ring", size), &data, |b, data| {
            b.iter(|| ring_crc32(&mut engine, &mut dev, data));
        });
    }

    group.finish();
}

/// Benchmark memory copy: std copy vs the full ring round trip.
fn bench_memcpy(c: &mut Criterion) {
    let sizes: Vec<usize> = vec![
        4 * 1024,    // 4 KB
        64 * 1024,   // 64 KB
        1024 * 1024, // 1 MB
    ];

    let mut group = c.benchmark_group("memcpy");
    let (mut engine, mut dev, _mem) = setup();

    for size in sizes {
        let src: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
        let mut dst_software = vec![0u8; size];
        let dst_ring = vec![0u8; size];

        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("std_copy", size), &src, |b, src| {
            b.iter(|| unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), dst_software.as_mut_ptr(), src.len());
            });
        });

        group.bench_with_input(BenchmarkId::new("ring", size), &src, |b, src| {
            b.iter(|| ring_copy(&mut engine, &mut dev, src, &dst_ring));
        });
    }

    group.finish();
}

/// Benchmark submission overhead: a minimal one-descriptor transaction.
fn bench_submit_overhead(c: &mut Criterion) {
    let (mut engine, mut dev, _mem) = setup();
    let data = vec![0u8; 64];
    let out = vec![0u8; 64];

    c.bench_function("submit_roundtrip_64b", |b| {
        b.iter(|| ring_copy(&mut engine, &mut dev, &data, &out));
    });
}

criterion_group!(benches, bench_crc32, bench_memcpy, bench_submit_overhead);
criterion_main!(benches);
