//! Random-access file engine over sealed chunks.
//!
//! [`ChunkedFile`] gives plain-file semantics (open/read/write/seek/
//! truncate/append) on top of the container format. Reads and writes are
//! byte-for-byte equivalent to the same sequence of operations on an
//! unencrypted file; the chunking and resealing are invisible to callers.
//!
//! AEAD chunks cannot be partially rewritten, so every mutation of a chunk
//! is open → splice the plaintext copy → reseal. Writes that start past the
//! current end materialize the gap as zero-filled plaintext, reproducing
//! "seek past EOF then write" semantics exactly.
//!
//! Non-streaming containers keep chunk boundaries as pure arithmetic over
//! the logical offset, so every chunk's disk offset is computable from the
//! header alone. Streaming containers are append-only: each append seals a
//! fresh chunk record (`len | nonce | tag | ciphertext`) and never reopens
//! earlier ones, which also means record boundaries must be rediscovered by
//! walking the records at open time.
//!
//! All I/O is synchronous and blocking; a handle must not be shared across
//! threads. Two handles may read the same closed container concurrently,
//! and a `Scan` handle may follow a streaming container that another handle
//! is appending to, provided the writer syncs after each append.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use sealfs_core::{SealError, SealResult};
use sealfs_crypto::chunk::{open_chunk, seal_chunk, sealed_overhead, ChunkLayout};
use sealfs_crypto::{CipherSuite, DerivedKey, MasterKey, SuiteRegistry};

use crate::container::{
    build_descriptor, derive_for, Descriptor, Header, PackOptions, HEADER_SIZE,
    PLAINTEXT_SIZE_OFFSET,
};
use crate::stamp::Trailer;

/// Length prefix on each streaming chunk record.
const STREAM_LEN_PREFIX: u64 = 4;

/// How a [`ChunkedFile`] is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; the container must be complete and consistent.
    Read,
    /// Read-only, tolerant of a streaming container that is still being
    /// appended to: an incomplete trailing record is simply not visible yet.
    Scan,
    /// Create or overwrite: existing non-streaming content is discarded on
    /// open. The fails-if-exists variant is `WriteNew`; the keep-content
    /// variant is `WriteExisting`.
    Write,
    /// Create; fails if the file already exists.
    WriteNew,
    /// Open for in-place modification; fails if the file does not exist.
    WriteExisting,
    /// Create or open; position forced to end-of-file.
    Append,
    /// Like `Append` but fails if the file does not exist.
    AppendExisting,
}

impl OpenMode {
    pub fn writable(self) -> bool {
        !matches!(self, OpenMode::Read | OpenMode::Scan)
    }

    fn is_append(self) -> bool {
        matches!(self, OpenMode::Append | OpenMode::AppendExisting)
    }
}

/// Parameters for containers created by the engine. Ignored when opening
/// existing content (the descriptor on disk wins).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Suite id resolved against the registry for new containers.
    pub suite_id: String,
    pub kdf: sealfs_core::KdfType,
    pub salt: Option<Vec<u8>>,
    pub chunk_max_size: u32,
    pub first_chunk_max_size: u32,
    pub attach_suite: bool,
    /// Create an append-only streaming container.
    pub streaming: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let pack = PackOptions::default();
        Self {
            suite_id: CipherSuite::xchacha20_default().id,
            kdf: pack.kdf,
            salt: None,
            chunk_max_size: pack.chunk_max_size,
            first_chunk_max_size: pack.first_chunk_max_size,
            attach_suite: false,
            streaming: false,
        }
    }
}

impl EngineOptions {
    fn pack_options(&self) -> PackOptions {
        PackOptions {
            kdf: self.kdf,
            salt: self.salt.clone(),
            chunk_max_size: self.chunk_max_size,
            first_chunk_max_size: self.first_chunk_max_size,
            attach_suite: self.attach_suite,
        }
    }
}

/// One sealed record of a streaming container.
#[derive(Debug, Clone, Copy)]
struct StreamRecord {
    logical_start: u64,
    disk_offset: u64,
    plain_len: u32,
}

/// An open encrypted chunked file.
///
/// Owns the header/descriptor for the file; the master key is only borrowed
/// during `open` to derive the chunk key. Not safe to share across threads;
/// the engine does no internal locking. `Debug` output redacts the derived
/// key material.
#[derive(Debug)]
pub struct ChunkedFile {
    file: File,
    mode: OpenMode,
    descriptor: Descriptor,
    suite: CipherSuite,
    layout: ChunkLayout,
    key: DerivedKey,
    /// Absolute disk offset of chunk 0 (header + descriptor bytes).
    data_start: u64,
    /// Logical plaintext size.
    total: u64,
    /// Logical cursor; may point past `total`.
    pos: u64,
    /// Streaming record table, in logical order.
    records: Vec<StreamRecord>,
    /// Disk offset where streaming record discovery stopped.
    scan_cursor: u64,
}

impl ChunkedFile {
    /// Open with default creation options.
    pub fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        master: &MasterKey,
        registry: &SuiteRegistry,
    ) -> SealResult<Self> {
        Self::open_with(path, mode, master, registry, &EngineOptions::default())
    }

    /// Open a container file; `options` apply only when a new container is
    /// created by this call.
    pub fn open_with(
        path: impl AsRef<Path>,
        mode: OpenMode,
        master: &MasterKey,
        registry: &SuiteRegistry,
        options: &EngineOptions,
    ) -> SealResult<Self> {
        let path = path.as_ref();
        let this = match mode {
            OpenMode::Read | OpenMode::Scan => {
                let file = File::open(path)?;
                Self::load_existing(file, mode, master, registry)?
            }
            OpenMode::WriteNew => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(path)?;
                Self::init_new(file, mode, master, registry, options)?
            }
            OpenMode::Write => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)?;
                if file.metadata()?.len() > 0 {
                    // Even an overwrite refuses a streaming target: streaming
                    // files accept append modes only. Non-container content is
                    // simply replaced.
                    if let Ok((_, probe)) = Self::read_container(&file) {
                        if probe.streaming {
                            return Err(SealError::InvalidMode(
                                "streaming file only accepts append modes".to_string(),
                            ));
                        }
                    }
                    file.set_len(0)?;
                }
                Self::init_new(file, mode, master, registry, options)?
            }
            OpenMode::WriteExisting | OpenMode::AppendExisting => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                if file.metadata()?.len() == 0 {
                    Self::init_new(file, mode, master, registry, options)?
                } else {
                    Self::load_existing(file, mode, master, registry)?
                }
            }
            OpenMode::Append => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)?;
                if file.metadata()?.len() == 0 {
                    Self::init_new(file, mode, master, registry, options)?
                } else {
                    Self::load_existing(file, mode, master, registry)?
                }
            }
        };

        debug!(
            path = %path.display(),
            ?mode,
            size = this.total,
            streaming = this.descriptor.streaming,
            "opened container"
        );
        Ok(this)
    }

    /// Write a fresh header + descriptor into an empty file.
    fn init_new(
        mut file: File,
        mode: OpenMode,
        master: &MasterKey,
        registry: &SuiteRegistry,
        options: &EngineOptions,
    ) -> SealResult<Self> {
        let suite = registry.resolve(&options.suite_id)?.clone();
        let descriptor = build_descriptor(&suite, &options.pack_options(), options.streaming);
        let layout = descriptor.layout()?;
        let key = derive_for(&descriptor, &suite, master)?;

        let descriptor_bytes = descriptor.encode()?;
        let header = Header {
            total_size: 0,
            descriptor_size: descriptor_bytes.len() as u32,
        };
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.encode())?;
        file.write_all(&descriptor_bytes)?;

        let data_start = HEADER_SIZE as u64 + descriptor_bytes.len() as u64;
        Ok(Self {
            file,
            mode,
            descriptor,
            suite,
            layout,
            key,
            data_start,
            total: 0,
            pos: 0,
            records: Vec::new(),
            scan_cursor: data_start,
        })
    }

    /// Read header + descriptor without building a full handle.
    fn read_container(mut file: &File) -> SealResult<(Header, Descriptor)> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header_bytes).map_err(truncated)?;
        let header = Header::parse(&header_bytes)?;

        let mut descriptor_bytes = vec![0u8; header.descriptor_size as usize];
        file.read_exact(&mut descriptor_bytes).map_err(truncated)?;
        let descriptor = Descriptor::parse(&descriptor_bytes)?;
        Ok((header, descriptor))
    }

    fn load_existing(
        file: File,
        mode: OpenMode,
        master: &MasterKey,
        registry: &SuiteRegistry,
    ) -> SealResult<Self> {
        let (header, descriptor) = Self::read_container(&file)?;

        if descriptor.streaming && mode.writable() && !mode.is_append() {
            return Err(SealError::InvalidMode(
                "streaming file only accepts append modes".to_string(),
            ));
        }

        let suite = descriptor.resolve_suite(registry)?.clone();
        let layout = descriptor.layout()?;
        let key = derive_for(&descriptor, &suite, master)?;
        let data_start = HEADER_SIZE as u64 + header.descriptor_size as u64;

        let mut this = Self {
            file,
            mode,
            descriptor,
            suite,
            layout,
            key,
            data_start,
            total: header.total_size,
            pos: 0,
            records: Vec::new(),
            scan_cursor: data_start,
        };

        if this.descriptor.streaming {
            // The record table, not the header, is the source of truth for a
            // streaming file (the header is only finalized on close).
            this.total = 0;
            this.scan_stream_records()?;
        } else {
            this.validate_physical()?;
        }

        if mode.is_append() {
            this.pos = this.total;
        }
        Ok(this)
    }

    /// Check the physical length of a non-streaming container against the
    /// header, and deal with an integrity-stamp trailer: writable handles
    /// strip it (which deliberately invalidates later stamp checks).
    fn validate_physical(&mut self) -> SealResult<()> {
        let physical = self.file.metadata()?.len();
        // The plaintext can never exceed the physical file; a corrupt size
        // field is rejected here, before it feeds the chunk arithmetic.
        if self.total > physical {
            return Err(SealError::TruncatedInput(format!(
                "header claims {} plaintext bytes in a {physical}-byte file",
                self.total
            )));
        }
        let used = self.used_size();
        if physical < used {
            return Err(SealError::TruncatedInput(format!(
                "container is {physical} bytes, chunk layout needs {used}"
            )));
        }
        if physical > used {
            let mut tail = vec![0u8; (physical - used) as usize];
            self.read_at(used, &mut tail)?;
            if Trailer::parse(&tail).is_err() {
                return Err(SealError::SizeMismatch {
                    expected: used,
                    actual: physical,
                });
            }
            if self.mode.writable() {
                self.file.set_len(used)?;
            }
        }
        Ok(())
    }

    /// Walk streaming chunk records from `scan_cursor`, extending the record
    /// table with every complete record found.
    fn scan_stream_records(&mut self) -> SealResult<()> {
        let physical = self.file.metadata()?.len();
        let overhead = self.overhead() as u64;
        let mut cursor = self.scan_cursor;

        while cursor < physical {
            let remaining = physical - cursor;

            // A stamp trailer sits where the next record would start.
            if remaining <= Trailer::max_len() as u64 {
                let mut tail = vec![0u8; remaining as usize];
                self.read_at(cursor, &mut tail)?;
                if Trailer::parse(&tail).is_ok() {
                    if self.mode.writable() {
                        self.file.set_len(cursor)?;
                    }
                    self.scan_cursor = cursor;
                    return Ok(());
                }
            }

            if remaining < STREAM_LEN_PREFIX {
                break;
            }
            let mut len_bytes = [0u8; 4];
            self.read_at(cursor, &mut len_bytes)?;
            let plain_len = u32::from_le_bytes(len_bytes) as u64;

            let index = self.records.len() as u64;
            let capacity = self.layout.capacity(index) as u64;
            if plain_len > capacity {
                if self.mode == OpenMode::Scan {
                    break; // record not fully visible yet
                }
                return Err(SealError::SizeMismatch {
                    expected: capacity,
                    actual: plain_len,
                });
            }

            let record_len = STREAM_LEN_PREFIX + overhead + plain_len;
            if remaining < record_len {
                break;
            }

            self.records.push(StreamRecord {
                logical_start: self.total,
                disk_offset: cursor,
                plain_len: plain_len as u32,
            });
            self.total += plain_len;
            cursor += record_len;
        }

        self.scan_cursor = cursor;
        if cursor < physical {
            match self.mode {
                // In-flight append by another handle; not visible yet.
                OpenMode::Scan => {}
                // Recovery from a writer that died mid-record.
                OpenMode::Append | OpenMode::AppendExisting => {
                    self.file.set_len(cursor)?;
                    debug!(discarded = physical - cursor, "dropped incomplete trailing record");
                }
                _ => {
                    return Err(SealError::TruncatedInput(
                        "incomplete trailing chunk record".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    // --- geometry ---------------------------------------------------------

    fn overhead(&self) -> usize {
        sealed_overhead(self.suite.aead.algorithm())
    }

    /// Disk offset of chunk `index` relative to `data_start`. Valid because
    /// every non-streaming chunk before the last is always full.
    fn chunk_disk_offset(&self, index: u64) -> u64 {
        let overhead = self.overhead() as u64;
        if index == 0 {
            0
        } else {
            overhead
                + self.layout.first_chunk_max as u64
                + (index - 1) * (overhead + self.layout.chunk_max as u64)
        }
    }

    /// Logical plaintext size.
    pub fn size(&self) -> u64 {
        self.total
    }

    /// Current logical cursor.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// On-disk bytes occupied by the whole file, including any trailer.
    pub fn storage_size(&self) -> SealResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// On-disk bytes occupied by header, descriptor, and chunk framing.
    pub fn used_size(&self) -> u64 {
        if self.descriptor.streaming {
            let framing = self.records.len() as u64 * (STREAM_LEN_PREFIX + self.overhead() as u64);
            self.data_start + framing + self.total
        } else {
            let count = self.layout.chunk_count(self.total);
            self.data_start + count * self.overhead() as u64 + self.total
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.descriptor.streaming
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Move the logical cursor. Always succeeds, including past end-of-file;
    /// the size is unchanged until a write materializes the gap.
    pub fn seek(&mut self, offset: u64) {
        self.pos = offset;
    }

    // --- raw I/O ----------------------------------------------------------

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SealResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf).map_err(truncated)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> SealResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Persist the header's total-size field.
    fn persist_total(&mut self) -> SealResult<()> {
        let bytes = self.total.to_le_bytes();
        self.write_at(PLAINTEXT_SIZE_OFFSET as u64, &bytes)
    }

    // --- chunk access -----------------------------------------------------

    /// Decrypt the full plaintext of non-streaming chunk `index`.
    fn read_chunk_plain(&mut self, index: u64) -> SealResult<Vec<u8>> {
        let plain_len = self.layout.chunk_plain_len(index, self.total);
        let framed_len = self.overhead() + plain_len as usize;
        let mut framed = vec![0u8; framed_len];
        let offset = self.data_start + self.chunk_disk_offset(index);
        self.read_at(offset, &mut framed)?;
        open_chunk(
            self.suite.aead.algorithm(),
            &self.key,
            index,
            b"",
            self.layout.capacity(index) as u64,
            &framed,
        )
    }

    /// Decrypt the full plaintext of streaming record `idx`.
    fn read_record_plain(&mut self, idx: usize) -> SealResult<Vec<u8>> {
        let record = self.records[idx];
        let mut framed = vec![0u8; self.overhead() + record.plain_len as usize];
        self.read_at(record.disk_offset + STREAM_LEN_PREFIX, &mut framed)?;
        open_chunk(
            self.suite.aead.algorithm(),
            &self.key,
            idx as u64,
            b"",
            self.layout.capacity(idx as u64) as u64,
            &framed,
        )
    }

    /// Index of the streaming record containing `offset` (< total).
    fn record_containing(&self, offset: u64) -> usize {
        self.records
            .partition_point(|r| r.logical_start <= offset)
            - 1
    }

    /// Pick up content appended by another handle since open (Scan mode).
    fn refresh(&mut self) -> SealResult<()> {
        if self.descriptor.streaming {
            self.scan_stream_records()
        } else {
            let mut size_bytes = [0u8; 8];
            self.read_at(PLAINTEXT_SIZE_OFFSET as u64, &mut size_bytes)?;
            self.total = u64::from_le_bytes(size_bytes);
            Ok(())
        }
    }

    // --- public read/write ------------------------------------------------

    /// Read up to `buf.len()` bytes at the cursor. Reading at or past
    /// end-of-file returns 0 bytes, never an error. Each covering chunk is
    /// opened exactly once.
    pub fn read(&mut self, buf: &mut [u8]) -> SealResult<usize> {
        if self.mode == OpenMode::Scan {
            self.refresh()?;
        }
        if self.pos >= self.total || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((self.total - self.pos) as usize);

        let mut done = 0usize;
        while done < want {
            let logical = self.pos + done as u64;
            let (plain, in_chunk) = if self.descriptor.streaming {
                let idx = self.record_containing(logical);
                let start = self.records[idx].logical_start;
                (self.read_record_plain(idx)?, (logical - start) as usize)
            } else {
                let loc = self.layout.locate(logical);
                (self.read_chunk_plain(loc.index)?, loc.offset_in_chunk as usize)
            };
            let take = (want - done).min(plain.len() - in_chunk);
            buf[done..done + take].copy_from_slice(&plain[in_chunk..in_chunk + take]);
            done += take;
        }

        self.pos += want as u64;
        Ok(want)
    }

    /// Decrypt the whole logical stream from offset 0. Leaves the cursor at
    /// end-of-file.
    pub fn read_all(&mut self) -> SealResult<Vec<u8>> {
        if self.mode == OpenMode::Scan {
            self.refresh()?;
        }
        self.seek(0);
        let mut out = vec![0u8; self.total as usize];
        let n = self.read(&mut out)?;
        out.truncate(n);
        Ok(out)
    }

    /// Write `data` at the cursor.
    ///
    /// Non-streaming: every touched chunk is opened, spliced, and resealed
    /// whole; a cursor past end-of-file first materializes a zero-filled gap.
    /// Streaming: the bytes are sealed into fresh records at end-of-file and
    /// no earlier record is touched.
    pub fn write(&mut self, data: &[u8]) -> SealResult<usize> {
        if !self.mode.writable() {
            return Err(SealError::InvalidMode("handle is read-only".to_string()));
        }
        if data.is_empty() {
            return Ok(0);
        }
        if self.descriptor.streaming {
            return self.append_stream(data);
        }

        let end = self.pos + data.len() as u64;
        self.materialize(self.pos, data, end)?;
        self.pos = end;
        self.persist_total()?;
        Ok(data.len())
    }

    /// Rewrite every chunk touched by `[fill..end)` so that `data` lands at
    /// `data_off` and any gap between the old size and the new content is
    /// zero-filled. Chunks are committed one at a time; there is no rollback
    /// across chunk boundaries.
    fn materialize(&mut self, data_off: u64, data: &[u8], end: u64) -> SealResult<()> {
        debug_assert!(end >= data_off + data.len() as u64);
        debug_assert!(end > 0);

        let fill_from = self.total.min(data_off);
        let first = self.layout.locate(fill_from).index;
        let last = self.layout.locate(end - 1).index;

        for index in first..=last {
            let chunk_start = self.layout.chunk_start(index);
            let capacity = self.layout.capacity(index) as u64;
            let old_len = self.layout.chunk_plain_len(index, self.total);
            let desired = (end - chunk_start).min(capacity);
            let new_len = desired.max(old_len);

            let mut plain = if old_len > 0 {
                self.read_chunk_plain(index)?
            } else {
                Vec::new()
            };
            plain.resize(new_len as usize, 0);

            let data_end = data_off + data.len() as u64;
            let lo = data_off.max(chunk_start);
            let hi = data_end.min(chunk_start + new_len);
            if lo < hi {
                plain[(lo - chunk_start) as usize..(hi - chunk_start) as usize]
                    .copy_from_slice(&data[(lo - data_off) as usize..(hi - data_off) as usize]);
            }

            let sealed = seal_chunk(self.suite.aead.algorithm(), &self.key, index, b"", &plain)?;
            let offset = self.data_start + self.chunk_disk_offset(index);
            self.write_at(offset, &sealed)?;
            self.total = self.total.max(chunk_start + new_len);
        }
        Ok(())
    }

    /// Seal `data` into fresh records at end-of-file.
    fn append_stream(&mut self, data: &[u8]) -> SealResult<usize> {
        if self.pos != self.total {
            return Err(SealError::InvalidMode(
                "streaming writes must append at end-of-file".to_string(),
            ));
        }

        let mut disk_offset = self.scan_cursor;
        let mut written = 0usize;
        while written < data.len() {
            let index = self.records.len() as u64;
            let capacity = self.layout.capacity(index) as usize;
            let take = (data.len() - written).min(capacity);
            let piece = &data[written..written + take];

            let sealed = seal_chunk(self.suite.aead.algorithm(), &self.key, index, b"", piece)?;
            let mut record = Vec::with_capacity(STREAM_LEN_PREFIX as usize + sealed.len());
            record.extend_from_slice(&(take as u32).to_le_bytes());
            record.extend_from_slice(&sealed);
            self.write_at(disk_offset, &record)?;

            self.records.push(StreamRecord {
                logical_start: self.total,
                disk_offset,
                plain_len: take as u32,
            });
            self.total += take as u64;
            disk_offset += record.len() as u64;
            written += take;
        }

        self.scan_cursor = disk_offset;
        self.pos = self.total;
        self.persist_total()?;
        Ok(written)
    }

    /// Change the logical size.
    ///
    /// Shrinking inside a chunk reseals only that chunk and drops everything
    /// after it; shrinking to a chunk boundary reseals nothing. Growing
    /// materializes a zero-filled extension immediately. The cursor is never
    /// moved — truncating to 0 and writing at the old cursor re-creates the
    /// zero gap, exactly like a plain file.
    pub fn truncate(&mut self, new_size: u64) -> SealResult<()> {
        if !self.mode.writable() {
            return Err(SealError::InvalidMode("handle is read-only".to_string()));
        }
        if self.descriptor.streaming {
            return Err(SealError::InvalidMode(
                "cannot truncate a streaming file".to_string(),
            ));
        }
        if new_size == self.total {
            return Ok(());
        }

        debug!(from = self.total, to = new_size, "truncate");
        if new_size > self.total {
            self.materialize(new_size, &[], new_size)?;
        } else if new_size == 0 {
            self.file.set_len(self.data_start)?;
            self.total = 0;
        } else {
            let loc = self.layout.locate(new_size);
            if loc.offset_in_chunk == 0 {
                // Exact boundary: drop whole chunks, nothing to reseal.
                self.file
                    .set_len(self.data_start + self.chunk_disk_offset(loc.index))?;
            } else {
                let mut plain = self.read_chunk_plain(loc.index)?;
                plain.truncate(loc.offset_in_chunk as usize);
                let sealed =
                    seal_chunk(self.suite.aead.algorithm(), &self.key, loc.index, b"", &plain)?;
                let offset = self.data_start + self.chunk_disk_offset(loc.index);
                self.write_at(offset, &sealed)?;
                self.file.set_len(offset + sealed.len() as u64)?;
            }
            self.total = new_size;
        }
        self.persist_total()
    }

    // --- durability -------------------------------------------------------

    /// Flush userspace buffers to the OS.
    pub fn flush(&mut self) -> SealResult<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Flush file data to the device (metadata may lag).
    pub fn sync(&mut self) -> SealResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Flush file data and metadata to the device.
    pub fn fsync(&mut self) -> SealResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Finalize the header's total-size field and release the handle.
    /// Consuming `self` makes a double close unrepresentable.
    pub fn close(mut self) -> SealResult<()> {
        if self.mode.writable() {
            self.persist_total()?;
            self.file.sync_all()?;
        }
        debug!(size = self.total, "closed container");
        Ok(())
    }
}

fn truncated(e: std::io::Error) -> SealError {
    if e.kind() == ErrorKind::UnexpectedEof {
        SealError::TruncatedInput("unexpected end of container".to_string())
    } else {
        SealError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealfs_core::KdfType;
    use tempfile::TempDir;

    fn registry() -> SuiteRegistry {
        SuiteRegistry::with_defaults()
    }

    fn master() -> MasterKey {
        // Raw key + HKDF keeps the tests free of Argon2 cost.
        MasterKey::raw(vec![0x42u8; 32])
    }

    fn options() -> EngineOptions {
        EngineOptions {
            kdf: KdfType::Hkdf,
            chunk_max_size: 4096,
            first_chunk_max_size: 4096,
            ..EngineOptions::default()
        }
    }

    fn open(
        dir: &TempDir,
        name: &str,
        mode: OpenMode,
    ) -> SealResult<ChunkedFile> {
        ChunkedFile::open_with(dir.path().join(name), mode, &master(), &registry(), &options())
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let mut f = open(&dir, "a.seal", OpenMode::WriteNew).unwrap();
        assert_eq!(f.write(&data).unwrap(), data.len());
        assert_eq!(f.size(), 10_000);
        assert_eq!(f.pos(), 10_000);
        f.close().unwrap();

        let mut f = open(&dir, "a.seal", OpenMode::Read).unwrap();
        assert_eq!(f.read_all().unwrap(), data);
    }

    #[test]
    fn read_past_eof_returns_zero_bytes() {
        let dir = TempDir::new().unwrap();
        let mut f = open(&dir, "a.seal", OpenMode::WriteNew).unwrap();
        f.write(b"abc").unwrap();
        f.seek(100);
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_new_fails_on_existing_file() {
        let dir = TempDir::new().unwrap();
        open(&dir, "a.seal", OpenMode::WriteNew).unwrap().close().unwrap();
        let err = open(&dir, "a.seal", OpenMode::WriteNew).unwrap_err();
        assert!(matches!(err, SealError::Io(ref e) if e.kind() == ErrorKind::AlreadyExists));
    }

    #[test]
    fn write_existing_fails_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = open(&dir, "missing.seal", OpenMode::WriteExisting).unwrap_err();
        assert!(matches!(err, SealError::Io(ref e) if e.kind() == ErrorKind::NotFound));
    }

    #[test]
    fn append_positions_at_end() {
        let dir = TempDir::new().unwrap();
        let mut f = open(&dir, "a.seal", OpenMode::WriteNew).unwrap();
        f.write(b"hello ").unwrap();
        f.close().unwrap();

        let mut f = open(&dir, "a.seal", OpenMode::AppendExisting).unwrap();
        assert_eq!(f.pos(), 6);
        f.write(b"world").unwrap();
        f.close().unwrap();

        let mut f = open(&dir, "a.seal", OpenMode::Read).unwrap();
        assert_eq!(f.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn overwrite_inside_one_chunk() {
        let dir = TempDir::new().unwrap();
        let mut f = open(&dir, "a.seal", OpenMode::WriteNew).unwrap();
        f.write(&[b'x'; 100]).unwrap();
        f.seek(10);
        f.write(b"YY").unwrap();
        assert_eq!(f.size(), 100);
        assert_eq!(f.pos(), 12);

        let mut expected = vec![b'x'; 100];
        expected[10] = b'Y';
        expected[11] = b'Y';
        assert_eq!(f.read_all().unwrap(), expected);
    }

    #[test]
    fn streaming_rejects_random_access_modes() {
        let dir = TempDir::new().unwrap();
        let opts = EngineOptions {
            streaming: true,
            ..options()
        };
        let mut f = ChunkedFile::open_with(
            dir.path().join("s.seal"),
            OpenMode::WriteNew,
            &master(),
            &registry(),
            &opts,
        )
        .unwrap();
        f.write(b"streamed").unwrap();
        f.close().unwrap();

        for mode in [OpenMode::Write, OpenMode::WriteExisting] {
            let err = open(&dir, "s.seal", mode).unwrap_err();
            assert!(matches!(err, SealError::InvalidMode(_)), "{mode:?}");
        }

        // Append works and never reopens sealed records.
        let mut f = open(&dir, "s.seal", OpenMode::AppendExisting).unwrap();
        f.write(b" more").unwrap();
        f.close().unwrap();

        let mut f = open(&dir, "s.seal", OpenMode::Read).unwrap();
        assert_eq!(f.read_all().unwrap(), b"streamed more");
    }

    #[test]
    fn streaming_truncate_is_invalid() {
        let dir = TempDir::new().unwrap();
        let opts = EngineOptions {
            streaming: true,
            ..options()
        };
        let mut f = ChunkedFile::open_with(
            dir.path().join("s.seal"),
            OpenMode::WriteNew,
            &master(),
            &registry(),
            &opts,
        )
        .unwrap();
        f.write(b"data").unwrap();
        let err = f.truncate(1).unwrap_err();
        assert!(matches!(err, SealError::InvalidMode(_)));
    }

    #[test]
    fn used_size_accounts_for_framing() {
        let dir = TempDir::new().unwrap();
        let mut f = open(&dir, "a.seal", OpenMode::WriteNew).unwrap();
        f.write(&[0u8; 5000]).unwrap(); // two chunks at 4096/4096
        let overhead = 24 + 16; // XChaCha20-Poly1305 nonce + tag
        let expected = f.used_size();
        assert_eq!(expected, f.storage_size().unwrap());
        assert!(expected > 5000 + 2 * overhead);
    }

    #[test]
    fn reads_are_read_only() {
        let dir = TempDir::new().unwrap();
        let mut f = open(&dir, "a.seal", OpenMode::WriteNew).unwrap();
        f.write(b"data").unwrap();
        f.close().unwrap();

        let mut f = open(&dir, "a.seal", OpenMode::Read).unwrap();
        assert!(matches!(f.write(b"x"), Err(SealError::InvalidMode(_))));
        assert!(matches!(f.truncate(0), Err(SealError::InvalidMode(_))));
    }
}
