//! Integrity stamps: trailing digest/MAC records over a closed container.
//!
//! A stamp covers every byte of the container up to the trailer (header,
//! descriptor, and all sealed chunks), so it detects tampering that per-chunk
//! AEAD alone cannot localize, and the digest form does it without any key.
//! The trailer is parsed from the end of the file:
//!
//! ```text
//! [digest bytes][mac bytes][digest_len: u8][mac_len: u8][flags: u8]["SFST"]
//! ```
//!
//! Stamps only make sense on closed files. Opening a container with any
//! writable mode strips the trailer, so a stamp taken before a modification
//! never verifies afterwards. The path-based API cannot see a concurrently
//! open writer handle on the same path; the caller must quiesce the file
//! before stamping or checking it.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use sealfs_core::{SealError, SealResult};
use sealfs_crypto::chunk::sealed_overhead;
use sealfs_crypto::SuiteRegistry;

use crate::container::{Descriptor, Header, HEADER_SIZE};

const TRAILER_MAGIC: [u8; 4] = *b"SFST";
/// digest_len + mac_len + flags + magic.
const TRAILER_FIXED: usize = 7;
const FLAG_DIGEST: u8 = 0b01;
const FLAG_MAC: u8 = 0b10;

/// Parsed stamp trailer. Either record may be absent; stamping again merges
/// with what is already there.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Trailer {
    pub(crate) digest: Option<Vec<u8>>,
    pub(crate) mac: Option<Vec<u8>>,
}

impl Trailer {
    /// Largest trailer the format can encode.
    pub(crate) fn max_len() -> usize {
        TRAILER_FIXED + 2 * u8::MAX as usize
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let digest = self.digest.as_deref().unwrap_or(&[]);
        let mac = self.mac.as_deref().unwrap_or(&[]);
        let mut out = Vec::with_capacity(digest.len() + mac.len() + TRAILER_FIXED);
        out.extend_from_slice(digest);
        out.extend_from_slice(mac);
        out.push(digest.len() as u8);
        out.push(mac.len() as u8);
        let mut flags = 0u8;
        if !digest.is_empty() {
            flags |= FLAG_DIGEST;
        }
        if !mac.is_empty() {
            flags |= FLAG_MAC;
        }
        out.push(flags);
        out.extend_from_slice(&TRAILER_MAGIC);
        out
    }

    /// Parse `tail` as exactly one trailer; any leftover or inconsistent
    /// bytes mean the tail is not a stamp.
    pub(crate) fn parse(tail: &[u8]) -> SealResult<Self> {
        let not_a_stamp = || SealError::StampMismatch;
        if tail.len() < TRAILER_FIXED || tail[tail.len() - 4..] != TRAILER_MAGIC {
            return Err(not_a_stamp());
        }
        let digest_len = tail[tail.len() - 7] as usize;
        let mac_len = tail[tail.len() - 6] as usize;
        let flags = tail[tail.len() - 5];
        if tail.len() != TRAILER_FIXED + digest_len + mac_len {
            return Err(not_a_stamp());
        }
        if (flags & FLAG_DIGEST != 0) != (digest_len > 0)
            || (flags & FLAG_MAC != 0) != (mac_len > 0)
            || flags & !(FLAG_DIGEST | FLAG_MAC) != 0
        {
            return Err(not_a_stamp());
        }
        Ok(Self {
            digest: (digest_len > 0).then(|| tail[..digest_len].to_vec()),
            mac: (mac_len > 0).then(|| tail[digest_len..digest_len + mac_len].to_vec()),
        })
    }
}

/// A container file split into stamped content and its (possibly absent)
/// trailer.
struct StampedFile {
    data: Vec<u8>,
    descriptor: Descriptor,
    content_len: usize,
    trailer: Trailer,
}

fn load(path: &Path, registry: &SuiteRegistry) -> SealResult<StampedFile> {
    let data = std::fs::read(path)?;
    let header = Header::parse(&data)?;
    let descriptor_end = HEADER_SIZE + header.descriptor_size as usize;
    if data.len() < descriptor_end {
        return Err(SealError::TruncatedInput(format!(
            "{} bytes, header promises a {}-byte descriptor",
            data.len(),
            header.descriptor_size
        )));
    }
    let descriptor = Descriptor::parse(&data[HEADER_SIZE..descriptor_end])?;

    // Reject a corrupt size field before it feeds the chunk arithmetic.
    if header.total_size > data.len() as u64 {
        return Err(SealError::TruncatedInput(format!(
            "header claims {} plaintext bytes in a {}-byte file",
            header.total_size,
            data.len()
        )));
    }

    let suite = descriptor.resolve_suite(registry)?;
    let overhead = sealed_overhead(suite.aead.algorithm());
    let layout = descriptor.layout()?;

    let content_len = if descriptor.streaming {
        // Record boundaries are only discoverable by walking the records.
        let mut cursor = descriptor_end;
        let mut index = 0u64;
        loop {
            let remaining = data.len() - cursor;
            if remaining == 0 || Trailer::parse(&data[cursor..]).is_ok() {
                break cursor;
            }
            if remaining < 4 {
                return Err(SealError::TruncatedInput(
                    "incomplete trailing chunk record".to_string(),
                ));
            }
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&data[cursor..cursor + 4]);
            let plain_len = u32::from_le_bytes(len_bytes) as usize;
            if plain_len as u64 > layout.capacity(index) as u64 {
                return Err(SealError::SizeMismatch {
                    expected: layout.capacity(index) as u64,
                    actual: plain_len as u64,
                });
            }
            let record_len = 4 + overhead + plain_len;
            if remaining < record_len {
                return Err(SealError::TruncatedInput(
                    "incomplete trailing chunk record".to_string(),
                ));
            }
            cursor += record_len;
            index += 1;
        }
    } else {
        let count = layout.chunk_count(header.total_size);
        descriptor_end + count as usize * overhead + header.total_size as usize
    };

    if data.len() < content_len {
        return Err(SealError::TruncatedInput(format!(
            "container is {} bytes, chunk layout needs {content_len}",
            data.len()
        )));
    }
    let tail = &data[content_len..];
    let trailer = if tail.is_empty() {
        Trailer::default()
    } else {
        // Non-empty trailing bytes must be a stamp; anything else is an
        // inconsistent file.
        Trailer::parse(tail).map_err(|_| SealError::SizeMismatch {
            expected: content_len as u64,
            actual: data.len() as u64,
        })?
    };

    Ok(StampedFile {
        data,
        descriptor,
        content_len,
        trailer,
    })
}

impl StampedFile {
    fn content(&self) -> &[u8] {
        &self.data[..self.content_len]
    }
}

fn rewrite_trailer(path: &Path, content_len: usize, trailer: &Trailer) -> SealResult<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.set_len(content_len as u64)?;
    file.seek(SeekFrom::Start(content_len as u64))?;
    file.write_all(&trailer.encode())?;
    file.sync_all()?;
    Ok(())
}

/// Append (or refresh) a keyless digest stamp using the container's suite.
pub fn stamp_digest(path: impl AsRef<Path>, registry: &SuiteRegistry) -> SealResult<()> {
    let path = path.as_ref();
    let stamped = load(path, registry)?;
    let suite = stamped.descriptor.resolve_suite(registry)?;
    let digest = suite.digest.algorithm().digest(stamped.content());

    let trailer = Trailer {
        digest: Some(digest),
        mac: stamped.trailer.mac.clone(),
    };
    rewrite_trailer(path, stamped.content_len, &trailer)?;
    debug!(path = %path.display(), "wrote digest stamp");
    Ok(())
}

/// Append (or refresh) a keyed MAC stamp. `mac_key` is independent of the
/// master key protecting the chunks.
pub fn stamp_mac(
    path: impl AsRef<Path>,
    mac_key: &[u8],
    registry: &SuiteRegistry,
) -> SealResult<()> {
    let path = path.as_ref();
    let stamped = load(path, registry)?;
    let suite = stamped.descriptor.resolve_suite(registry)?;
    let mac = suite.mac.algorithm().mac(mac_key, stamped.content());

    let trailer = Trailer {
        digest: stamped.trailer.digest.clone(),
        mac: Some(mac),
    };
    rewrite_trailer(path, stamped.content_len, &trailer)?;
    debug!(path = %path.display(), "wrote mac stamp");
    Ok(())
}

/// Verify the digest stamp. Requires no key of any kind.
pub fn check_stamp_digest(path: impl AsRef<Path>, registry: &SuiteRegistry) -> SealResult<()> {
    let stamped = load(path.as_ref(), registry)?;
    let expected = stamped.trailer.digest.as_ref().ok_or(SealError::StampMissing)?;
    let suite = stamped.descriptor.resolve_suite(registry)?;
    if &suite.digest.algorithm().digest(stamped.content()) != expected {
        return Err(SealError::StampMismatch);
    }
    Ok(())
}

/// Verify the MAC stamp with `mac_key`.
///
/// A failed MAC is reported as [`SealError::InvalidKey`] when a digest stamp
/// is present and verifies (the content is intact, so the key must be wrong),
/// and as [`SealError::StampMismatch`] otherwise.
pub fn verify_stamp_mac(
    path: impl AsRef<Path>,
    mac_key: &[u8],
    registry: &SuiteRegistry,
) -> SealResult<()> {
    let stamped = load(path.as_ref(), registry)?;
    let expected = stamped.trailer.mac.as_ref().ok_or(SealError::StampMissing)?;
    let suite = stamped.descriptor.resolve_suite(registry)?;
    if &suite.mac.algorithm().mac(mac_key, stamped.content()) == expected {
        return Ok(());
    }
    if let Some(digest) = &stamped.trailer.digest {
        if &suite.digest.algorithm().digest(stamped.content()) == digest {
            return Err(SealError::InvalidKey(
                "mac key does not match the stamp".to_string(),
            ));
        }
    }
    Err(SealError::StampMismatch)
}
