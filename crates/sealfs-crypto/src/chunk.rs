//! Per-chunk AEAD codec and chunk boundary arithmetic.
//!
//! Sealed chunk format (binary):
//! ```text
//! [nonce][16 bytes: tag][N bytes: ciphertext]
//! ```
//! The nonce is deterministic — BLAKE3-keyed(nonce seed, chunk index) — so
//! it can be recomputed at open time. `open_chunk` re-derives the expected
//! nonce and rejects a stored nonce that differs, which makes chunk
//! transplantation (moving a sealed chunk to a different index) fail before
//! AEAD verification even runs.
//!
//! Chunk boundaries are pure arithmetic over the logical offset: chunk 0
//! holds up to `first_chunk_max` bytes, every later chunk up to `chunk_max`.

use sealfs_core::{SealError, SealResult};

use crate::keyderive::DerivedKey;
use crate::provider::AeadAlgorithm;

/// Default capacity of chunk 0.
pub const DEFAULT_FIRST_CHUNK_MAX: u32 = 0x1000;

/// Default capacity of every chunk after the first.
pub const DEFAULT_CHUNK_MAX: u32 = 0x4_0000;

/// Fixed chunk-size policy for one container. Set at creation and never
/// changed for existing chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub first_chunk_max: u32,
    pub chunk_max: u32,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            first_chunk_max: DEFAULT_FIRST_CHUNK_MAX,
            chunk_max: DEFAULT_CHUNK_MAX,
        }
    }
}

/// Where a logical offset falls in the chunk sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub index: u64,
    pub offset_in_chunk: u64,
    /// Capacity of the containing chunk (not its current fill).
    pub capacity: u32,
}

impl ChunkLayout {
    pub fn new(first_chunk_max: u32, chunk_max: u32) -> SealResult<Self> {
        if first_chunk_max == 0 || chunk_max == 0 {
            return Err(SealError::InvalidDescriptor(
                "chunk sizes must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            first_chunk_max,
            chunk_max,
        })
    }

    /// Logical offset where chunk `index` begins.
    pub fn chunk_start(&self, index: u64) -> u64 {
        if index == 0 {
            0
        } else {
            self.first_chunk_max as u64 + (index - 1) * self.chunk_max as u64
        }
    }

    /// Plaintext capacity of chunk `index`.
    pub fn capacity(&self, index: u64) -> u32 {
        if index == 0 {
            self.first_chunk_max
        } else {
            self.chunk_max
        }
    }

    /// Map a logical offset to (chunk index, offset within chunk, capacity).
    pub fn locate(&self, offset: u64) -> ChunkLocation {
        if offset < self.first_chunk_max as u64 {
            ChunkLocation {
                index: 0,
                offset_in_chunk: offset,
                capacity: self.first_chunk_max,
            }
        } else {
            let rel = offset - self.first_chunk_max as u64;
            ChunkLocation {
                index: 1 + rel / self.chunk_max as u64,
                offset_in_chunk: rel % self.chunk_max as u64,
                capacity: self.chunk_max,
            }
        }
    }

    /// Number of chunks needed to hold `len` logical bytes.
    pub fn chunk_count(&self, len: u64) -> u64 {
        if len == 0 {
            return 0;
        }
        if len <= self.first_chunk_max as u64 {
            return 1;
        }
        let rest = len - self.first_chunk_max as u64;
        1 + rest.div_ceil(self.chunk_max as u64)
    }

    /// Current plaintext length of chunk `index` in a container holding
    /// `total_len` logical bytes. Zero if the chunk does not exist.
    pub fn chunk_plain_len(&self, index: u64, total_len: u64) -> u64 {
        let start = self.chunk_start(index);
        if start >= total_len {
            return 0;
        }
        (total_len - start).min(self.capacity(index) as u64)
    }
}

/// On-disk framing overhead per sealed chunk.
pub fn sealed_overhead(aead: &dyn AeadAlgorithm) -> usize {
    aead.nonce_len() + aead.tag_len()
}

/// Seal one chunk: derive the nonce for `index`, encrypt, and frame as
/// `nonce | tag | ciphertext`.
pub fn seal_chunk(
    aead: &dyn AeadAlgorithm,
    key: &DerivedKey,
    index: u64,
    aad: &[u8],
    plaintext: &[u8],
) -> SealResult<Vec<u8>> {
    let nonce = key.nonce_for(index, aead.nonce_len());
    let mut sealed = aead.seal(key.key_bytes(), &nonce, aad, plaintext)?;

    // seal() returns ciphertext || tag; the framing wants the tag first.
    let tag_at = sealed.len() - aead.tag_len();
    let tag = sealed.split_off(tag_at);
    let ciphertext = sealed;

    let mut framed = Vec::with_capacity(nonce.len() + tag.len() + ciphertext.len());
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&tag);
    framed.extend_from_slice(&ciphertext);
    Ok(framed)
}

/// Open one framed chunk sealed by [`seal_chunk`].
///
/// `capacity` is the chunk's policy capacity; a ciphertext longer than that
/// is a [`SealError::SizeMismatch`] before any decryption happens. Any
/// corrupted byte in nonce, tag, or ciphertext yields
/// [`SealError::AuthenticationFailed`].
pub fn open_chunk(
    aead: &dyn AeadAlgorithm,
    key: &DerivedKey,
    index: u64,
    aad: &[u8],
    capacity: u64,
    framed: &[u8],
) -> SealResult<Vec<u8>> {
    let overhead = sealed_overhead(aead);
    if framed.len() < overhead {
        return Err(SealError::TruncatedInput(format!(
            "sealed chunk is {} bytes, minimum is {overhead}",
            framed.len()
        )));
    }

    let (nonce, rest) = framed.split_at(aead.nonce_len());
    let (tag, ciphertext) = rest.split_at(aead.tag_len());

    if ciphertext.len() as u64 > capacity {
        return Err(SealError::SizeMismatch {
            expected: capacity,
            actual: ciphertext.len() as u64,
        });
    }

    // A nonce that does not match the derived one is either corruption or a
    // chunk moved to the wrong index; both are authentication failures.
    let expected_nonce = key.nonce_for(index, aead.nonce_len());
    if nonce != expected_nonce.as_slice() {
        return Err(SealError::AuthenticationFailed);
    }

    let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);
    aead.open(key.key_bytes(), nonce, aad, &sealed)
}
