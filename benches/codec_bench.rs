//! Performance benchmarks for frame encoding and decoding.
//!
//! A polling cycle over 99 modules encodes and decodes roughly 200 frames,
//! so per-frame cost must stay well below the inter-module pause.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench codec_bench
//! ```

use bytes::BytesMut;
use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use parkgate_core::ModuleAddress;
use parkgate_protocol::{BusCodec, Command, Opcode, Reply, decode_reply, encode, encode_frame};
use std::hint::black_box;
use tokio_util::codec::Decoder;

fn address() -> ModuleAddress {
    ModuleAddress::new(15).unwrap()
}

fn novelty_frame() -> bytes::Bytes {
    let mut payload = vec![0x80, 0x00];
    payload.extend_from_slice(b"00012345");
    payload.extend_from_slice(b"250307080509");
    encode_frame(address(), Opcode::StatusNovelty, &payload)
}

/// Benchmark encoding each command kind.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    let at = NaiveDate::from_ymd_opt(2025, 3, 7)
        .unwrap()
        .and_hms_opt(8, 5, 9)
        .unwrap();
    let commands = [
        ("status", Command::status(address())),
        ("set_time", Command::set_time(address(), at)),
        ("pulse", Command::pulse(address(), 1, 1000).unwrap()),
    ];

    for (name, command) in &commands {
        group.bench_with_input(BenchmarkId::from_parameter(name), command, |b, cmd| {
            b.iter(|| black_box(encode(black_box(cmd))));
        });
    }

    group.finish();
}

/// Benchmark decoding and interpreting replies.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let status = encode_frame(address(), Opcode::Status, &[0x01, 0x00]);
    let novelty = novelty_frame();

    group.bench_function("status_reply", |b| {
        b.iter(|| {
            let frame = decode_reply(black_box(&status)).unwrap();
            black_box(Reply::from_frame(&frame).unwrap());
        });
    });

    group.bench_function("novelty_reply", |b| {
        b.iter(|| {
            let frame = decode_reply(black_box(&novelty)).unwrap();
            black_box(Reply::from_frame(&frame).unwrap());
        });
    });

    group.finish();
}

/// Benchmark the streaming codec over a buffer of back-to-back replies.
fn bench_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream");

    for count in [10usize, 100] {
        let mut stream = BytesMut::new();
        for _ in 0..count {
            stream.extend_from_slice(&encode_frame(address(), Opcode::Status, &[0x03, 0x02]));
        }

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &stream, |b, stream| {
            b.iter(|| {
                let mut codec = BusCodec::replies();
                let mut buffer = stream.clone();
                while let Some(frame) = codec.decode(&mut buffer).unwrap() {
                    black_box(frame);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_stream);
criterion_main!(benches);
