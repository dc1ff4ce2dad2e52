// ABOUTME: Benchmark suite for frame codec and record parser performance
// ABOUTME: Measures incremental decode, frame encoding, and field-tree parsing across message sizes

use astm_gateway::codec::{decode_frame, encode_frame, encode_message};
use astm_gateway::record::{parse_record, Delimiters};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

fn bench_decode_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_frame");
    group.measurement_time(Duration::from_secs(10));

    let short = encode_frame(0, b"H|\\^&|||cobas", true);
    group.bench_function("short_frame", |b| {
        b.iter(|| decode_frame(black_box(&short)))
    });

    let long_data = vec![b'A'; 240];
    let long = encode_frame(1, &long_data, true);
    group.bench_function("max_size_frame", |b| {
        b.iter(|| decode_frame(black_box(&long)))
    });

    group.bench_function("bad_checksum", |b| {
        let mut bad = short.to_vec();
        let len = bad.len();
        bad[len - 4] = if bad[len - 4] == b'0' { b'1' } else { b'0' };
        b.iter(|| decode_frame(black_box(&bad)))
    });

    group.finish();
}

fn bench_encode_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_message");
    group.measurement_time(Duration::from_secs(10));

    for &size in &[16usize, 240, 1024, 4096] {
        let data = vec![b'x'; size];
        group.bench_with_input(BenchmarkId::new("bytes", size), &data, |b, data| {
            b.iter(|| encode_message(0, black_box(data)))
        });
    }

    group.finish();
}

fn bench_parse_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_record");
    group.measurement_time(Duration::from_secs(10));

    let delims = Delimiters::default();

    let header = "H|\\^&|||cobas 6000^1|||||||P|1|20240315143022";
    group.bench_function("header", |b| {
        b.iter(|| parse_record(black_box(header), &delims))
    });

    let result_record =
        "R|1|^^^GLU|98|mg/dL|70-110|N||F||tech||20240315143022";
    group.bench_function("result_record", |b| {
        b.iter(|| parse_record(black_box(result_record), &delims))
    });

    let with_escapes = "C|1|a&F&b&R&c&S&d";
    group.bench_function("escape_heavy", |b| {
        b.iter(|| parse_record(black_box(with_escapes), &delims))
    });

    group.finish();
}

criterion_group!(benches, bench_decode_frame, bench_encode_message, bench_parse_record);
criterion_main!(benches);
