//! Benchmarks for binspect parsers
//!
//! Run with: cargo bench

use std::hint::black_box;
use std::io::Write;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flate2::write::GzEncoder;
use flate2::Compression;

use binspect_parsers::formats::{GzipParser, PngParser};
use binspect_parsers::{guess_parser, list_fields, Grep, GrepOptions, ListOptions, Parser};
use binspect_stream::MemoryStream;

fn png_chunk(tag: &[u8], body: &[u8]) -> Vec<u8> {
    let mut data = (body.len() as u32).to_be_bytes().to_vec();
    data.extend_from_slice(tag);
    data.extend_from_slice(body);
    data.extend_from_slice(&[0; 4]);
    data
}

/// PNG with `count` text chunks between the header and the image data
fn png_with_chunks(count: usize) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1A\n".to_vec();
    let mut ihdr = 640u32.to_be_bytes().to_vec();
    ihdr.extend_from_slice(&480u32.to_be_bytes());
    ihdr.extend_from_slice(&[8, 0x06, 0, 0, 0]);
    data.extend(png_chunk(b"IHDR", &ihdr));
    for i in 0..count {
        let text = format!("Comment\0entry number {}", i);
        data.extend(png_chunk(b"tEXt", text.as_bytes()));
    }
    data.extend(png_chunk(b"IDAT", &[0u8; 4096]));
    data.extend_from_slice(b"\0\0\0\0IEND\xae\x42\x60\x82");
    data
}

/// Benchmark a full walk of PNG trees of growing size
fn bench_png_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("png_walk");

    for count in [10, 100, 1000] {
        let data = png_with_chunks(count);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("list_fields", count), &data, |b, data| {
            b.iter(|| {
                let stream = MemoryStream::new(data.clone()).into_shared();
                let parser = Parser::new(Arc::new(PngParser::new()), stream, true).unwrap();
                black_box(list_fields(parser.root(), &ListOptions::default()).len())
            })
        });
    }

    group.finish();
}

/// Benchmark lazy access: only the fields up to the target are decoded
fn bench_lazy_access(c: &mut Criterion) {
    let data = png_with_chunks(1000);
    let mut group = c.benchmark_group("lazy_access");

    group.bench_function("header_width", |b| {
        b.iter(|| {
            let stream = MemoryStream::new(data.clone()).into_shared();
            let parser = Parser::new(Arc::new(PngParser::new()), stream, false).unwrap();
            black_box(parser.value(black_box("/header/width")).unwrap())
        })
    });

    group.bench_function("last_text", |b| {
        b.iter(|| {
            let stream = MemoryStream::new(data.clone()).into_shared();
            let parser = Parser::new(Arc::new(PngParser::new()), stream, false).unwrap();
            black_box(parser.value(black_box("/text[999]/text")).unwrap())
        })
    });

    group.finish();
}

/// Benchmark guessing and grepping
fn bench_guess_and_grep(c: &mut Criterion) {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&vec![b'x'; 100_000]).unwrap();
    let gzip = encoder.finish().unwrap();
    let png = png_with_chunks(500);

    let mut group = c.benchmark_group("guess");
    group.bench_function("gzip", |b| {
        b.iter(|| {
            let stream = MemoryStream::new(gzip.clone()).into_shared();
            black_box(guess_parser(stream, None, None).map(|p| p.id().to_string()))
        })
    });
    group.bench_function("gzip_direct", |b| {
        b.iter(|| {
            let stream = MemoryStream::new(gzip.clone()).into_shared();
            black_box(Parser::new(Arc::new(GzipParser::new()), stream, true).is_ok())
        })
    });
    group.finish();

    let grep = Grep::new("number 499", GrepOptions::default()).unwrap();
    c.bench_function("grep_png_text", |b| {
        b.iter(|| {
            let stream = MemoryStream::new(png.clone()).into_shared();
            let parser = Parser::new(Arc::new(PngParser::new()), stream, true).unwrap();
            black_box(grep.search(parser.root(), None).len())
        })
    });
}

criterion_group!(benches, bench_png_walk, bench_lazy_access, bench_guess_and_grep);
criterion_main!(benches);
