use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kipblz::blz::{self, CompressionMode};
use kipblz::kip::{BuildOptions, Kip1, KipHeader};

fn code_like(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| match i % 8 {
            0 | 1 => (i >> 3) as u8,
            2 => 0x00,
            3 => 0x94,
            4..=6 => 0x1F,
            _ => 0xD5,
        })
        .collect()
}

fn bench_blz(c: &mut Criterion) {
    let data = code_like(256 * 1024);
    let packed = blz::compress(&data, true);

    c.bench_function("blz_compress_256k_fast", |b| {
        b.iter(|| blz::compress_with(black_box(&data), CompressionMode::Fast))
    });
    c.bench_function("blz_compress_256k_best", |b| {
        b.iter(|| blz::compress_with(black_box(&data), CompressionMode::Best))
    });
    c.bench_function("blz_decompress_256k", |b| b.iter(|| blz::decompress(black_box(&packed))));
}

fn bench_kip_recompress(c: &mut Criterion) {
    let mut header = KipHeader::new("bench", 0x0100_0000_0000_0000);
    let segments = [code_like(128 * 1024), vec![0x42; 32 * 1024], code_like(16 * 1024), vec![], vec![], vec![]];
    for (info, data) in header.segments.iter_mut().zip(&segments) {
        info.decompressed_size = data.len() as u32;
    }
    let bytes = Kip1::new(header, segments, Vec::new()).to_bytes(&BuildOptions::default());

    c.bench_function("kip1_parse_and_recompress", |b| {
        b.iter(|| {
            let kip = Kip1::parse(black_box(&bytes)).unwrap();
            kip.to_bytes(&BuildOptions::default())
        })
    });
}

criterion_group!(benches, bench_blz, bench_kip_recompress);
criterion_main!(benches);
