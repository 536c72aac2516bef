//! File-semantics transparency: a ChunkedFile must behave byte-for-byte
//! like a plain file under the same sequence of operations.

use proptest::prelude::*;
use tempfile::TempDir;

use sealfs_core::{KdfType, SealError};
use sealfs_crypto::{MasterKey, SuiteRegistry};
use sealfs_store::{ChunkedFile, EngineOptions, OpenMode};

fn registry() -> SuiteRegistry {
    SuiteRegistry::with_defaults()
}

fn master() -> MasterKey {
    MasterKey::raw(vec![0x5Au8; 32])
}

fn options(first_max: u32, chunk_max: u32) -> EngineOptions {
    EngineOptions {
        kdf: KdfType::Hkdf,
        first_chunk_max_size: first_max,
        chunk_max_size: chunk_max,
        ..EngineOptions::default()
    }
}

fn create(dir: &TempDir, name: &str, first_max: u32, chunk_max: u32) -> ChunkedFile {
    ChunkedFile::open_with(
        dir.path().join(name),
        OpenMode::WriteNew,
        &master(),
        &registry(),
        &options(first_max, chunk_max),
    )
    .unwrap()
}

fn reopen(dir: &TempDir, name: &str, mode: OpenMode) -> ChunkedFile {
    ChunkedFile::open(dir.path().join(name), mode, &master(), &registry()).unwrap()
}

/// Reference model: a plain in-memory file.
#[derive(Default)]
struct Model {
    bytes: Vec<u8>,
    pos: usize,
}

impl Model {
    fn write(&mut self, data: &[u8]) {
        if self.pos > self.bytes.len() {
            self.bytes.resize(self.pos, 0);
        }
        let end = self.pos + data.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }

    fn truncate(&mut self, new_size: usize) {
        self.bytes.resize(new_size, 0);
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[test]
fn irregular_writes_then_truncate() {
    // 10,000 bytes built from 7 irregular writes across the 4096/4096 chunk
    // grid, then truncated to 4196 (100 bytes into chunk 1).
    let dir = TempDir::new().unwrap();
    let mut file = create(&dir, "f.seal", 4096, 4096);
    let mut model = Model::default();

    let writes: [(u64, usize); 7] = [
        (0, 1000),
        (1000, 3500),   // crosses the chunk 0/1 boundary
        (4500, 17),
        (4517, 4000),   // crosses the chunk 1/2 boundary
        (8517, 1),
        (8518, 1400),
        (9918, 82),
    ];
    for (i, (offset, len)) in writes.into_iter().enumerate() {
        let data = pattern(len, i as u8);
        file.seek(offset);
        model.pos = offset as usize;
        assert_eq!(file.write(&data).unwrap(), len);
        model.write(&data);
    }
    assert_eq!(file.size(), 10_000);
    assert_eq!(model.bytes.len(), 10_000);
    assert_eq!(file.read_all().unwrap(), model.bytes);

    file.truncate(4196).unwrap();
    model.truncate(4196);
    assert_eq!(file.size(), 4196);
    assert_eq!(file.read_all().unwrap(), model.bytes);
    file.close().unwrap();

    let mut file = reopen(&dir, "f.seal", OpenMode::Read);
    assert_eq!(file.read_all().unwrap(), model.bytes);
}

#[test]
fn seek_past_eof_write_materializes_zero_gap() {
    let dir = TempDir::new().unwrap();
    let mut file = create(&dir, "gap.seal", 4096, 4096);

    file.write(b"head").unwrap();
    file.seek(9000); // far past EOF, into chunk 2
    file.write(b"tail").unwrap();

    assert_eq!(file.size(), 9004);
    let bytes = file.read_all().unwrap();
    assert_eq!(&bytes[..4], b"head");
    assert!(bytes[4..9000].iter().all(|&b| b == 0));
    assert_eq!(&bytes[9000..], b"tail");
}

#[test]
fn seek_past_eof_without_write_leaves_size_alone() {
    let dir = TempDir::new().unwrap();
    let mut file = create(&dir, "f.seal", 4096, 4096);
    file.write(b"abc").unwrap();
    file.seek(1_000_000);
    assert_eq!(file.size(), 3);
    let mut buf = [0u8; 4];
    assert_eq!(file.read(&mut buf).unwrap(), 0);
}

#[test]
fn truncate_variants() {
    let dir = TempDir::new().unwrap();
    let mut file = create(&dir, "t.seal", 1000, 1000);
    let data = pattern(3500, 7);
    file.write(&data).unwrap();

    // Shrink to a mid-chunk offset: only the covering chunk is resealed.
    file.truncate(2345).unwrap();
    assert_eq!(file.read_all().unwrap(), data[..2345]);

    // Shrink to an exact chunk boundary.
    file.truncate(2000).unwrap();
    assert_eq!(file.read_all().unwrap(), data[..2000]);

    // Truncate to the current size is a no-op.
    let storage = file.storage_size().unwrap();
    file.truncate(2000).unwrap();
    assert_eq!(file.storage_size().unwrap(), storage);

    // Grow: extension reads back as zeros.
    file.truncate(2600).unwrap();
    let bytes = file.read_all().unwrap();
    assert_eq!(&bytes[..2000], &data[..2000]);
    assert!(bytes[2000..].iter().all(|&b| b == 0));

    // Shrink to zero.
    file.truncate(0).unwrap();
    assert_eq!(file.size(), 0);
    assert_eq!(file.read_all().unwrap(), Vec::<u8>::new());
}

#[test]
fn truncate_never_moves_the_cursor() {
    let dir = TempDir::new().unwrap();
    let mut file = create(&dir, "t.seal", 1000, 1000);
    file.write(&pattern(1500, 3)).unwrap();
    assert_eq!(file.pos(), 1500);

    file.truncate(0).unwrap();
    assert_eq!(file.pos(), 1500);

    // Writing at the stale cursor re-creates the zero gap.
    file.write(b"Z").unwrap();
    let bytes = file.read_all().unwrap();
    assert_eq!(bytes.len(), 1501);
    assert!(bytes[..1500].iter().all(|&b| b == 0));
    assert_eq!(bytes[1500], b'Z');
}

#[test]
fn overwrite_spanning_many_chunks() {
    let dir = TempDir::new().unwrap();
    let mut file = create(&dir, "span.seal", 100, 100);
    let base = pattern(950, 1);
    file.write(&base).unwrap();

    let patch = pattern(430, 9);
    file.seek(85);
    file.write(&patch).unwrap();

    let mut expected = base.clone();
    expected[85..515].copy_from_slice(&patch);
    assert_eq!(file.read_all().unwrap(), expected);
    assert_eq!(file.size(), 950);
}

#[test]
fn wrong_master_key_fails_authentication() {
    let dir = TempDir::new().unwrap();
    let mut file = create(&dir, "k.seal", 4096, 4096);
    file.write(b"secret").unwrap();
    file.close().unwrap();

    let wrong = MasterKey::raw(vec![0xEEu8; 32]);
    let mut file =
        ChunkedFile::open(dir.path().join("k.seal"), OpenMode::Read, &wrong, &registry()).unwrap();
    let err = file.read_all().unwrap_err();
    assert!(matches!(err, SealError::AuthenticationFailed));
}

#[test]
fn truncated_container_is_detected_at_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cut.seal");
    let mut file = create(&dir, "cut.seal", 4096, 4096);
    file.write(&pattern(5000, 2)).unwrap();
    file.close().unwrap();

    let len = std::fs::metadata(&path).unwrap().len();
    let raw = std::fs::read(&path).unwrap();
    std::fs::write(&path, &raw[..len as usize - 10]).unwrap();

    let err = ChunkedFile::open(&path, OpenMode::Read, &master(), &registry()).unwrap_err();
    assert!(matches!(err, SealError::TruncatedInput(_)));
}

#[test]
fn corrupted_size_field_is_rejected_at_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("huge.seal");
    let mut file = create(&dir, "huge.seal", 4096, 4096);
    file.write(b"tiny").unwrap();
    file.close().unwrap();

    // A size field near u64::MAX must fail cleanly at open, never feed the
    // chunk arithmetic.
    let mut raw = std::fs::read(&path).unwrap();
    raw[6..14].copy_from_slice(&u64::MAX.to_le_bytes());
    std::fs::write(&path, &raw).unwrap();

    let err = ChunkedFile::open(&path, OpenMode::Read, &master(), &registry()).unwrap_err();
    assert!(matches!(err, SealError::TruncatedInput(_)));
}

#[test]
fn foreign_trailing_bytes_are_a_size_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pad.seal");
    let mut file = create(&dir, "pad.seal", 4096, 4096);
    file.write(b"data").unwrap();
    file.close().unwrap();

    let mut raw = std::fs::read(&path).unwrap();
    raw.extend_from_slice(b"junk that is not a stamp trailer");
    std::fs::write(&path, &raw).unwrap();

    let err = ChunkedFile::open(&path, OpenMode::Read, &master(), &registry()).unwrap_err();
    assert!(matches!(err, SealError::SizeMismatch { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Random op sequences match the plain-file model exactly.
    #[test]
    fn random_ops_match_plain_file(
        ops in prop::collection::vec(
            prop_oneof![
                // (seek target, write payload)
                (0u64..6000, prop::collection::vec(any::<u8>(), 1..700))
                    .prop_map(|(pos, data)| (0u8, pos, data)),
                (0u64..6000).prop_map(|pos| (1u8, pos, Vec::new())),
                (0u64..6000).prop_map(|size| (2u8, size, Vec::new())),
            ],
            1..20,
        )
    ) {
        let dir = TempDir::new().unwrap();
        let mut file = create(&dir, "p.seal", 512, 512);
        let mut model = Model::default();

        for (kind, arg, data) in ops {
            match kind {
                0 => {
                    file.seek(arg);
                    model.pos = arg as usize;
                    file.write(&data).unwrap();
                    model.write(&data);
                }
                1 => {
                    file.seek(arg);
                    model.pos = arg as usize;
                }
                _ => {
                    file.truncate(arg).unwrap();
                    model.truncate(arg as usize);
                }
            }
            prop_assert_eq!(file.size(), model.bytes.len() as u64);
            prop_assert_eq!(file.pos(), model.pos as u64);
        }
        prop_assert_eq!(file.read_all().unwrap(), model.bytes.clone());

        // Survives a close/reopen cycle.
        file.close().unwrap();
        let mut file = reopen(&dir, "p.seal", OpenMode::Read);
        prop_assert_eq!(file.read_all().unwrap(), model.bytes);
    }
}
