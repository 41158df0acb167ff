//! Frame codec throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use audiolan::codec::{is_silent, FrameDecoder, FrameEncoder};
use audiolan::constants::{BYTES_PER_SAMPLE, DEFAULT_FRAME_LENGTH};

fn tone() -> Vec<f32> {
    (0..DEFAULT_FRAME_LENGTH)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 44_100.0).sin() * 0.5)
        .collect()
}

fn benchmark_encode(c: &mut Criterion) {
    let samples = tone();
    let encoder = FrameEncoder::new(DEFAULT_FRAME_LENGTH);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes((DEFAULT_FRAME_LENGTH * BYTES_PER_SAMPLE) as u64));
    group.bench_function("encode_frame", |b| {
        b.iter(|| black_box(encoder.encode(black_box(&samples))))
    });
    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let encoded = FrameEncoder::new(DEFAULT_FRAME_LENGTH)
        .encode(&tone())
        .unwrap();
    let decoder = FrameDecoder::new(DEFAULT_FRAME_LENGTH);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("decode_frame", |b| {
        b.iter(|| black_box(decoder.decode(black_box(&encoded))))
    });
    group.finish();
}

fn benchmark_silence_check(c: &mut Criterion) {
    // Worst case: every sample has to be inspected
    let silence = vec![0.0f32; DEFAULT_FRAME_LENGTH];

    c.bench_function("is_silent_full_frame", |b| {
        b.iter(|| black_box(is_silent(black_box(&silence))))
    });
}

criterion_group!(benches, benchmark_encode, benchmark_decode, benchmark_silence_check);
criterion_main!(benches);
