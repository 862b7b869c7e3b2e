//! Benchmarks for write-slot generation and execution

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use slotgen::codegen::{ExecutionMode, SlotCodegen};
use slotgen::descriptor::{TupleDescriptor, TupleDescriptorBuilder, TupleId};
use slotgen::runtime::MemPool;
use slotgen::scan::{ScanConfig, TextScanner, WriteSlotCache};
use slotgen::text_converter::{EscapeConfig, TextConverter};
use slotgen::tuple::TupleBuffer;
use slotgen::types::PrimitiveType;
use std::sync::Arc;

fn int_layout() -> TupleDescriptor {
    TupleDescriptorBuilder::new(TupleId(0))
        .add_slot(PrimitiveType::Int, true)
        .build()
}

/// Time to build and lower one routine
fn bench_generate(c: &mut Criterion) {
    let desc = int_layout();
    let converter = TextConverter::new(EscapeConfig::none());
    let mut group = c.benchmark_group("generate");

    for mode in [ExecutionMode::Compiled, ExecutionMode::Interpreted] {
        group.bench_function(format!("{:?}", mode), |b| {
            b.iter(|| {
                let mut codegen = SlotCodegen::with_mode(mode);
                black_box(converter.codegen_write_slot(&mut codegen, &desc, &desc.slots()[0]))
            })
        });
    }

    group.finish();
}

/// Per-field cost of each write path
fn bench_write_slot(c: &mut Criterion) {
    let desc = int_layout();
    let slot = &desc.slots()[0];
    let converter = TextConverter::new(EscapeConfig::none());
    let fields: Vec<String> = (0..1024).map(|i| (i * 7919).to_string()).collect();
    let pool = MemPool::new();

    let mut group = c.benchmark_group("write_slot");
    group.throughput(Throughput::Elements(fields.len() as u64));

    for mode in [ExecutionMode::Compiled, ExecutionMode::Interpreted] {
        let mut codegen = SlotCodegen::with_mode(mode);
        let Some(routine) = converter.codegen_write_slot(&mut codegen, &desc, slot) else {
            continue;
        };
        group.bench_function(format!("generated_{:?}", mode), |b| {
            let mut tuple = TupleBuffer::for_descriptor(&desc);
            b.iter(|| {
                for field in &fields {
                    black_box(routine.write(&mut tuple, field.as_bytes()));
                }
            })
        });
    }

    group.bench_function("dispatch", |b| {
        let mut tuple = TupleBuffer::for_descriptor(&desc);
        b.iter(|| {
            for field in &fields {
                black_box(converter.write_slot(slot, &mut tuple, field.as_bytes(), false, false, &pool));
            }
        })
    });

    group.finish();
}

fn bench_unescape(c: &mut Criterion) {
    let converter = TextConverter::new(EscapeConfig::byte(b'\\'));
    let src = b"some\\,text with \\\\ a few escapes\\, and plain bytes".repeat(16);
    let mut dest = vec![0u8; src.len()];

    let mut group = c.benchmark_group("unescape");
    group.throughput(Throughput::Bytes(src.len() as u64));
    group.bench_function("copy", |b| {
        b.iter(|| black_box(converter.unescape(black_box(&src), &mut dest)))
    });
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let desc = Arc::new(
        TupleDescriptorBuilder::from_schema(TupleId(0), "int,string,double,boolean")
            .unwrap()
            .build(),
    );
    let input: Vec<u8> = (0..10_000)
        .flat_map(|i| format!("{},name{},{}.5,true\n", i, i % 97, i).into_bytes())
        .collect();
    let cache = WriteSlotCache::default();

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Bytes(input.len() as u64));
    for use_codegen in [true, false] {
        let scanner = TextScanner::new(
            Arc::clone(&desc),
            ScanConfig {
                use_codegen,
                ..ScanConfig::default()
            },
            &cache,
        );
        let name = if use_codegen { "generated" } else { "dispatch" };
        group.bench_function(name, |b| b.iter(|| black_box(scanner.scan(&input).unwrap().num_rows())));
        group.bench_function(format!("{}_parallel_4", name), |b| {
            b.iter(|| black_box(scanner.scan_parallel(&input, 4).unwrap().len()))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_generate,
    bench_write_slot,
    bench_unescape,
    bench_scan
);
criterion_main!(benches);
