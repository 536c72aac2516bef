use sealfs_core::KdfType;
use sealfs_crypto::{derive_chunk_key, open_chunk, seal_chunk, CipherSuite, MasterKey};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn bench_key() -> sealfs_crypto::DerivedKey {
    let suite = CipherSuite::xchacha20_default();
    let master = MasterKey::raw(vec![0xABu8; 32]);
    derive_chunk_key(&master, &[1u8; 16], KdfType::Hkdf, &suite).unwrap()
}

#[divan::bench(args = [1024, 65536, 262144])]
fn bench_seal_chunk(bencher: divan::Bencher, size: usize) {
    let suite = CipherSuite::xchacha20_default();
    let aead = suite.aead.algorithm();
    let key = bench_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            seal_chunk(aead, divan::black_box(&key), 0, b"", divan::black_box(&data)).unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 262144])]
fn bench_open_chunk(bencher: divan::Bencher, size: usize) {
    let suite = CipherSuite::xchacha20_default();
    let aead = suite.aead.algorithm();
    let key = bench_key();
    let data = make_data(size);
    let sealed = seal_chunk(aead, &key, 0, b"", &data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            open_chunk(
                aead,
                divan::black_box(&key),
                0,
                b"",
                size as u64,
                divan::black_box(&sealed),
            )
            .unwrap()
        });
}

fn main() {
    divan::main();
}
