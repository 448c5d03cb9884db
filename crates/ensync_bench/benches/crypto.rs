//! Envelope encryption benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ensync_bench::random_content;
use ensync_core::crypto::{CryptoCodec, KeyMaterial};
use ensync_core::{Content, Replica};

/// Benchmark encrypting one revision.
fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypt");

    for size in [64, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let replica: Replica<Content> = Replica::in_memory().unwrap();
            let doc = replica.create_doc(random_content(size)).unwrap();
            let content = doc.content.clone().unwrap();
            let codec = CryptoCodec::new(KeyMaterial::generate());

            b.iter(|| {
                let envelope = codec
                    .encrypt(&doc.doc_id, &doc.revision(), black_box(&content))
                    .unwrap();
                black_box(envelope);
            });
        });
    }
    group.finish();
}

/// Benchmark verifying and decrypting one envelope.
fn bench_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("decrypt");

    for size in [64, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let replica: Replica<Content> = Replica::in_memory().unwrap();
            let doc = replica.create_doc(random_content(size)).unwrap();
            let codec = CryptoCodec::new(KeyMaterial::generate());
            let envelope = codec
                .encrypt(&doc.doc_id, &doc.revision(), doc.content.as_ref().unwrap())
                .unwrap();

            b.iter(|| {
                let content = codec
                    .decrypt(&doc.doc_id, &doc.revision(), black_box(&envelope))
                    .unwrap();
                black_box(content);
            });
        });
    }
    group.finish();
}

/// Benchmark HKDF key derivation from a passphrase.
fn bench_key_derivation(c: &mut Criterion) {
    c.bench_function("derive_from_secret", |b| {
        b.iter(|| {
            let keys = KeyMaterial::derive_from_secret(black_box(b"correct horse"), b"bench-salt")
                .unwrap();
            black_box(keys);
        });
    });
}

criterion_group!(benches, bench_encrypt, bench_decrypt, bench_key_derivation);
criterion_main!(benches);
