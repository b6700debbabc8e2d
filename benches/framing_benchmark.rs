//! Benchmarks for wire framing and task parsing.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use procpool::Message;
use procpool::pool::{FrameReader, tokenize_args};

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [16, 256, 4096].iter() {
        let msg = Message::print("x".repeat(*size));
        group.bench_with_input(BenchmarkId::new("print", size), size, |b, _| {
            b.iter(|| black_box(msg.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_decode_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_stream");

    for count in [100, 1000].iter() {
        let stream: Vec<u8> = (0..*count)
            .flat_map(|i| Message::print(format!("line {}", i)).encode().unwrap())
            .collect();

        group.bench_with_input(BenchmarkId::new("frames", count), count, |b, _| {
            b.iter(|| {
                let mut reader = FrameReader::new(stream.as_slice());
                let mut n = 0;
                while let Some(msg) = reader.recv().unwrap() {
                    black_box(msg);
                    n += 1;
                }
                n
            });
        });
    }

    group.finish();
}

fn bench_tokenize(c: &mut Criterion) {
    let params = r#"run "a quoted argument" plain --flag "another one" tail"#;
    c.bench_function("tokenize_args", |b| {
        b.iter(|| black_box(tokenize_args(black_box(params))))
    });
}

criterion_group!(benches, bench_encode, bench_decode_stream, bench_tokenize);
criterion_main!(benches);
