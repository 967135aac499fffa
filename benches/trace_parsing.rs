//! Criterion benchmarks for trace decoding.
//!
//! A ZNB trace holds up to 100 001 points, so reply parsing and format
//! conversion dominate fetch time once the sweep is done.
//!
//! Key metrics:
//! - ASCII reply parsing vs binary block decoding for the same trace
//! - Conversion of complex samples into each output format
//!
//! Run with: cargo bench --bench trace_parsing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use num_complex::Complex64;
use vna_scpi::trace::{decode_real_block, parse_ascii_values, to_complex};
use vna_scpi::{TraceData, TraceFormat};

const POINT_COUNTS: [usize; 3] = [201, 10_001, 100_001];

fn interleaved(points: usize) -> Vec<f64> {
    (0..points)
        .flat_map(|i| {
            let phase = i as f64 * 0.01;
            [phase.cos() * 0.5, phase.sin() * 0.5]
        })
        .collect()
}

/// Parse comma-separated ASCII replies.
fn ascii_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_ascii");

    for points in POINT_COUNTS {
        let reply = interleaved(points)
            .iter()
            .map(|v| format!("{:.12E}", v))
            .collect::<Vec<_>>()
            .join(",");

        group.throughput(Throughput::Bytes(reply.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(points), &reply, |b, reply| {
            b.iter(|| parse_ascii_values(black_box(reply)).unwrap());
        });
    }

    group.finish();
}

/// Decode REAL,32 and REAL,64 block payloads.
fn binary_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_real_block");

    for points in POINT_COUNTS {
        let values = interleaved(points);
        let real64: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let real32: Vec<u8> = values
            .iter()
            .flat_map(|v| (*v as f32).to_le_bytes())
            .collect();

        group.throughput(Throughput::Elements(points as u64));
        group.bench_with_input(BenchmarkId::new("real64", points), &real64, |b, payload| {
            b.iter(|| decode_real_block(black_box(payload), 8).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("real32", points), &real32, |b, payload| {
            b.iter(|| decode_real_block(black_box(payload), 4).unwrap());
        });
    }

    group.finish();
}

/// Convert samples into each output representation.
fn format_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace_format");
    let samples: Vec<Complex64> = to_complex(&interleaved(10_001)).unwrap();

    for format in [TraceFormat::RealImag, TraceFormat::DbPhase, TraceFormat::AmpPhase] {
        group.throughput(Throughput::Elements(samples.len() as u64));
        group.bench_function(format.as_str(), |b| {
            b.iter(|| TraceData::from_complex("Trc1", black_box(&samples), format));
        });
    }

    group.finish();
}

criterion_group!(benches, ascii_parsing, binary_decoding, format_conversion);
criterion_main!(benches);
