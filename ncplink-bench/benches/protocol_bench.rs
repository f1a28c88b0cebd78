//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ncplink_protocol::frame::{checksum, Frame};
use ncplink_protocol::{slip, Command, Decoder, DispatchTable, Encoder, HandlerResult};

fn test_frame(payload_size: usize) -> Frame {
    // 0xC0 and 0xDB in the payload force escaping.
    let payload: Vec<u8> = (0..payload_size).map(|i| (i % 256) as u8).collect();
    Frame::request(Command::ApsDataRequest, 7, payload)
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [16, 128, 1024, 16384] {
        let frame = test_frame(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [16, 128, 1024, 16384] {
        let raw = test_frame(size).to_bytes().unwrap().freeze();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &raw, |b, raw| {
            b.iter(|| {
                let mut buf = raw.clone();
                black_box(Frame::decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_stream_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decode");

    for size in [16, 128, 1024, 16384] {
        let encoded = test_frame(size).encode().unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(encoded);
                black_box(decoder.decode_frame().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_batch_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_decode");

    for count in [4, 32] {
        let frames: Vec<Frame> = (0..count)
            .map(|i| Frame::notify(Command::NetworkPermitJoining, i as u8 + 1, vec![180]))
            .collect();
        let packet = Encoder::encode_batch(&frames).unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &packet, |b, packet| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(packet);
                let mut n = 0;
                while let Some(frame) = decoder.decode_frame().unwrap() {
                    black_box(frame);
                    n += 1;
                }
                n
            });
        });
    }

    group.finish();
}

fn bench_slip(c: &mut Criterion) {
    let mut group = c.benchmark_group("slip");

    for size in [128, 16384] {
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        let stuffed = slip::encode(&data);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &data, |b, data| {
            b.iter(|| black_box(slip::encode(data)));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &stuffed, |b, stuffed| {
            b.iter(|| black_box(slip::decode(stuffed).unwrap()));
        });
    }

    group.finish();
}

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16");

    for size in [16, 1024, 65535] {
        let data = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(checksum(data)));
        });
    }

    group.finish();
}

fn echo(_ctx: &(), input: &[u8]) -> HandlerResult {
    Ok(Bytes::copy_from_slice(input))
}

fn bench_dispatch(c: &mut Criterion) {
    let table = Command::ALL
        .iter()
        .fold(DispatchTable::<()>::builder(), |builder, command| {
            builder.register(*command, echo)
        })
        .build();

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("hit", |b| {
        b.iter(|| black_box(table.dispatch(&(), Command::ApsDataConfirm.id(), &[0x01])));
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(table.dispatch(&(), 0x7777, &[0x01])));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_stream_decode,
    bench_batch_decode,
    bench_slip,
    bench_checksum,
    bench_dispatch,
);

criterion_main!(benches);
