//! Throughput benchmarks for the decoder, the dispatcher and snapshot
//! encoding.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use replaykv::commands::CommandHandler;
use replaykv::connection::Pipeline;
use replaykv::persistence::Snapshotter;
use replaykv::protocol::{FrameDecoder, RespValue};
use replaykv::storage::{now_millis, Entry, GlobPattern, Keyspace, SharedKeyspace};

fn populated(n: usize) -> SharedKeyspace {
    let keyspace = Keyspace::shared();
    {
        let mut ks = keyspace.borrow_mut();
        let now = now_millis();
        for i in 0..n {
            let entry = if i % 4 == 0 {
                Entry::with_expiry(Bytes::from(format!("value:{}", i)), now + 3_600_000)
            } else {
                Entry::new(Bytes::from(format!("value:{}", i)))
            };
            ks.set(Bytes::from(format!("key:{}", i)), entry);
        }
    }
    keyspace
}

fn set_stream(n: usize, value_len: usize) -> Vec<u8> {
    let value = "x".repeat(value_len);
    let mut buf = Vec::new();
    for i in 0..n {
        RespValue::command(["SET".to_string(), format!("key:{}", i), value.clone()])
            .serialize_into(&mut buf);
    }
    buf
}

/// Decoding a pipelined stream, whole and in small chunks.
fn bench_decode(c: &mut Criterion) {
    let stream = set_stream(1_000, 32);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("one_chunk", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut frames = 0usize;
            let _ = decoder.feed(black_box(&stream), |_| {
                frames += 1;
                std::ops::ControlFlow::Continue(())
            });
            black_box(frames)
        });
    });

    group.bench_function("chunks_of_16", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut frames = 0usize;
            for chunk in stream.chunks(16) {
                let _ = decoder.feed(black_box(chunk), |_| {
                    frames += 1;
                    std::ops::ControlFlow::Continue(())
                });
            }
            black_box(frames)
        });
    });

    group.finish();
}

/// Full decode → dispatch → encode path.
fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    for value_len in [16usize, 1024] {
        let stream = set_stream(1_000, value_len);
        group.throughput(Throughput::Elements(1_000));
        group.bench_function(format!("set_{}b", value_len), |b| {
            b.iter_batched(
                || Pipeline::new(CommandHandler::new(Keyspace::shared(), "bench")),
                |mut pipeline| {
                    let mut out = Vec::with_capacity(8 * 1024);
                    let _ = pipeline.process(&stream, Some(&mut out));
                    black_box(out.len())
                },
                BatchSize::SmallInput,
            );
        });
    }

    let keyspace = populated(10_000);
    let mut gets = Vec::new();
    for i in 0..1_000 {
        RespValue::command(["GET".to_string(), format!("key:{}", i * 7)]).serialize_into(&mut gets);
    }
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("get_hit", |b| {
        let mut pipeline = Pipeline::new(CommandHandler::new(keyspace.clone(), "bench"));
        let mut out = Vec::with_capacity(32 * 1024);
        b.iter(|| {
            out.clear();
            let _ = pipeline.process(&gets, Some(&mut out));
            black_box(out.len())
        });
    });

    group.finish();
}

/// KEYS-style glob filtering over a mixed keyspace.
fn bench_keys(c: &mut Criterion) {
    let keyspace = Keyspace::shared();
    {
        let mut ks = keyspace.borrow_mut();
        for i in 0..1_000 {
            ks.set(Bytes::from(format!("user:{}", i)), Entry::new(Bytes::from("u")));
            ks.set(Bytes::from(format!("session:{}", i)), Entry::new(Bytes::from("s")));
            ks.set(Bytes::from(format!("cache:{}", i)), Entry::new(Bytes::from("c")));
        }
    }

    let prefix = GlobPattern::new("user:*");
    let single = GlobPattern::new("session:?0");

    let mut group = c.benchmark_group("keys");
    group.bench_function("prefix", |b| {
        b.iter(|| black_box(keyspace.borrow().keys(Some(&prefix))));
    });
    group.bench_function("question_mark", |b| {
        b.iter(|| black_box(keyspace.borrow().keys(Some(&single))));
    });
    group.bench_function("all", |b| {
        b.iter(|| black_box(keyspace.borrow().keys(None)));
    });
    group.finish();
}

/// Snapshot encoding and replay.
fn bench_snapshot(c: &mut Criterion) {
    let source = populated(10_000);
    let encoded = match Snapshotter::new(source.clone(), None).encode() {
        Ok(bytes) => bytes,
        Err(e) => panic!("encoding failed: {:#}", e),
    };

    let mut group = c.benchmark_group("snapshot");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("encode", |b| {
        let snapshotter = Snapshotter::new(source.clone(), None);
        b.iter(|| black_box(snapshotter.encode().map(|bytes| bytes.len()).unwrap_or(0)));
    });

    group.bench_function("replay", |b| {
        b.iter_batched(
            || Pipeline::new(CommandHandler::new(Keyspace::shared(), "bench")),
            |mut pipeline| {
                let _ = pipeline.process(&encoded, None);
                black_box(pipeline.commands())
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_pipeline, bench_keys, bench_snapshot);
criterion_main!(benches);
