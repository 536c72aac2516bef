//! Container header, descriptor, and whole-buffer pack/unpack.
//!
//! Header format (fixed 18 bytes, little-endian):
//! ```text
//! [0..4)   magic "SEAL"
//! [4..6)   format version (u16)
//! [6..14)  total plaintext size (u64)
//! [14..18) descriptor size (u32)
//! ```
//! The descriptor is a JSON document directly after the header; it carries
//! everything needed to re-derive the chunk key (KDF type, salt) and to
//! parse the chunk sequence (chunk sizes, streaming flag, cipher suite).
//!
//! Header and descriptor are validated before any chunk is decrypted: a
//! corrupted marker, size field, or descriptor byte is rejected without
//! touching ciphertext.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sealfs_core::{KdfType, SealError, SealResult};
use sealfs_crypto::chunk::{
    open_chunk, seal_chunk, sealed_overhead, ChunkLayout, DEFAULT_CHUNK_MAX,
    DEFAULT_FIRST_CHUNK_MAX,
};
use sealfs_crypto::{derive_chunk_key, CipherSuite, DerivedKey, MasterKey, SuiteRegistry};

pub const MAGIC: [u8; 4] = *b"SEAL";
pub const FORMAT_VERSION: u16 = 1;

/// Fixed header size; always present and parseable before any chunk data.
pub const HEADER_SIZE: usize = 18;

/// Byte offset of the total-plaintext-size field within the header.
pub const PLAINTEXT_SIZE_OFFSET: usize = 6;

/// Byte offset of the descriptor-size field within the header.
pub const DESCRIPTOR_SIZE_OFFSET: usize = 14;

/// Auto-generated salt length.
const GENERATED_SALT_LEN: usize = 16;

/// Upper bound on the descriptor: even with an embedded suite body the JSON
/// stays well under a kilobyte, so anything near this is a corrupt header.
pub const MAX_DESCRIPTOR_SIZE: u32 = 1 << 20;

/// The fixed-size container prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Logical plaintext size of the container's content.
    pub total_size: u64,
    /// Serialized size of the descriptor that follows the header.
    pub descriptor_size: u32,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&MAGIC);
        out[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        out[PLAINTEXT_SIZE_OFFSET..DESCRIPTOR_SIZE_OFFSET]
            .copy_from_slice(&self.total_size.to_le_bytes());
        out[DESCRIPTOR_SIZE_OFFSET..].copy_from_slice(&self.descriptor_size.to_le_bytes());
        out
    }

    /// Parse and validate the fixed header. Fails before any chunk data is
    /// examined.
    pub fn parse(data: &[u8]) -> SealResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(SealError::TruncatedInput(format!(
                "{} bytes, header needs {HEADER_SIZE}",
                data.len()
            )));
        }
        if data[..4] != MAGIC {
            return Err(SealError::InvalidHeader("bad format marker".to_string()));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != FORMAT_VERSION {
            return Err(SealError::InvalidHeader(format!(
                "unsupported format version {version}"
            )));
        }
        let total_size = u64::from_le_bytes(
            data[PLAINTEXT_SIZE_OFFSET..DESCRIPTOR_SIZE_OFFSET]
                .try_into()
                .expect("fixed slice"),
        );
        let descriptor_size = u32::from_le_bytes(
            data[DESCRIPTOR_SIZE_OFFSET..HEADER_SIZE]
                .try_into()
                .expect("fixed slice"),
        );
        if descriptor_size == 0 {
            return Err(SealError::InvalidHeader("empty descriptor".to_string()));
        }
        if descriptor_size > MAX_DESCRIPTOR_SIZE {
            return Err(SealError::InvalidHeader(format!(
                "descriptor size {descriptor_size} exceeds the {MAX_DESCRIPTOR_SIZE}-byte limit"
            )));
        }
        Ok(Self {
            total_size,
            descriptor_size,
        })
    }
}

/// Per-container parameters, written once at creation and immutable after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub kdf: KdfType,
    #[serde(with = "salt_b64")]
    pub salt: Vec<u8>,
    pub chunk_max_size: u32,
    pub first_chunk_max_size: u32,
    /// Append-only container: chunks carry explicit length framing and are
    /// never resealed.
    pub streaming: bool,
    pub suite_id: String,
    /// Embedded suite body when `attach_cipher_suite` was requested; makes
    /// the container self-describing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<CipherSuite>,
}

mod salt_b64 {
    use super::*;
    use serde::Deserializer;

    pub fn serialize<S: serde::Serializer>(salt: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64.encode(salt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        BASE64.decode(&s).map_err(serde::de::Error::custom)
    }
}

impl Descriptor {
    pub fn encode(&self) -> SealResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SealError::InvalidDescriptor(format!("serialization: {e}")))
    }

    pub fn parse(data: &[u8]) -> SealResult<Self> {
        let descriptor: Descriptor = serde_json::from_slice(data)
            .map_err(|e| SealError::InvalidDescriptor(e.to_string()))?;
        // Reject nonsense sizes before they reach offset arithmetic.
        descriptor.layout()?;
        if let Some(suite) = &descriptor.suite {
            if suite.id != descriptor.suite_id {
                return Err(SealError::InvalidDescriptor(format!(
                    "embedded suite id {:?} does not match descriptor id {:?}",
                    suite.id, descriptor.suite_id
                )));
            }
        }
        Ok(descriptor)
    }

    pub fn layout(&self) -> SealResult<ChunkLayout> {
        ChunkLayout::new(self.first_chunk_max_size, self.chunk_max_size)
    }

    /// Resolve the cipher suite: the embedded body wins when attached,
    /// otherwise the registry is consulted by id.
    pub fn resolve_suite<'a>(&'a self, registry: &'a SuiteRegistry) -> SealResult<&'a CipherSuite> {
        if let Some(suite) = &self.suite {
            return Ok(suite);
        }
        registry.resolve(&self.suite_id)
    }
}

/// Options for [`pack`] and for new files created by the engine.
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub kdf: KdfType,
    /// Caller-supplied salt; generated (16 bytes) when `None`.
    pub salt: Option<Vec<u8>>,
    pub chunk_max_size: u32,
    pub first_chunk_max_size: u32,
    /// Embed the full cipher-suite body in the descriptor.
    pub attach_suite: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            kdf: KdfType::default(),
            salt: None,
            chunk_max_size: DEFAULT_CHUNK_MAX,
            first_chunk_max_size: DEFAULT_FIRST_CHUNK_MAX,
            attach_suite: false,
        }
    }
}

pub(crate) fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; GENERATED_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub(crate) fn build_descriptor(
    suite: &CipherSuite,
    opts: &PackOptions,
    streaming: bool,
) -> Descriptor {
    Descriptor {
        kdf: opts.kdf,
        salt: opts.salt.clone().unwrap_or_else(generate_salt),
        chunk_max_size: opts.chunk_max_size,
        first_chunk_max_size: opts.first_chunk_max_size,
        streaming,
        suite_id: suite.id.clone(),
        suite: opts.attach_suite.then(|| suite.clone()),
    }
}

/// Single-shot encrypt of an in-memory buffer into a complete container.
pub fn pack(
    plaintext: &[u8],
    master: &MasterKey,
    suite: &CipherSuite,
    opts: &PackOptions,
) -> SealResult<Vec<u8>> {
    let descriptor = build_descriptor(suite, opts, false);
    let layout = descriptor.layout()?;
    let key = derive_chunk_key(master, &descriptor.salt, descriptor.kdf, suite)?;

    let descriptor_bytes = descriptor.encode()?;
    let header = Header {
        total_size: plaintext.len() as u64,
        descriptor_size: descriptor_bytes.len() as u32,
    };

    let aead = suite.aead.algorithm();
    let count = layout.chunk_count(plaintext.len() as u64);
    let mut out = Vec::with_capacity(
        HEADER_SIZE
            + descriptor_bytes.len()
            + plaintext.len()
            + count as usize * sealed_overhead(aead),
    );
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&descriptor_bytes);

    for index in 0..count {
        let start = layout.chunk_start(index) as usize;
        let len = layout.chunk_plain_len(index, plaintext.len() as u64) as usize;
        let sealed = seal_chunk(aead, &key, index, b"", &plaintext[start..start + len])?;
        out.extend_from_slice(&sealed);
    }

    debug!(
        plaintext = plaintext.len(),
        packed = out.len(),
        chunks = count,
        suite = %suite.id,
        "packed buffer"
    );
    Ok(out)
}

/// Single-shot decrypt of a complete container produced by [`pack`].
///
/// Header and descriptor failures are reported before any chunk decryption;
/// a wrong master key is indistinguishable from chunk tampering
/// ([`SealError::AuthenticationFailed`]).
pub fn unpack(data: &[u8], master: &MasterKey, registry: &SuiteRegistry) -> SealResult<Vec<u8>> {
    let header = Header::parse(data)?;
    let descriptor_end = HEADER_SIZE + header.descriptor_size as usize;
    if data.len() < descriptor_end {
        return Err(SealError::TruncatedInput(format!(
            "{} bytes, header promises a {}-byte descriptor",
            data.len(),
            header.descriptor_size
        )));
    }
    let descriptor = Descriptor::parse(&data[HEADER_SIZE..descriptor_end])?;
    if descriptor.streaming {
        return Err(SealError::InvalidMode(
            "streaming containers cannot be unpacked as a whole buffer".to_string(),
        ));
    }

    let suite = descriptor.resolve_suite(registry)?;
    let layout = descriptor.layout()?;
    let key = derive_chunk_key(master, &descriptor.salt, descriptor.kdf, suite)?;

    // The plaintext can never exceed the container itself; a corrupt size
    // field is rejected here, before it feeds the chunk arithmetic.
    if header.total_size > data.len() as u64 {
        return Err(SealError::TruncatedInput(format!(
            "header claims {} plaintext bytes in a {}-byte container",
            header.total_size,
            data.len()
        )));
    }

    let aead = suite.aead.algorithm();
    let overhead = sealed_overhead(aead) as u64;
    let count = layout.chunk_count(header.total_size);
    let expected_payload = count * overhead + header.total_size;

    let payload = &data[descriptor_end..];
    if (payload.len() as u64) < expected_payload {
        return Err(SealError::TruncatedInput(format!(
            "{} payload bytes, expected {expected_payload}",
            payload.len()
        )));
    }
    if payload.len() as u64 > expected_payload {
        return Err(SealError::SizeMismatch {
            expected: expected_payload,
            actual: payload.len() as u64,
        });
    }

    let mut plaintext = Vec::with_capacity(header.total_size as usize);
    let mut offset = 0usize;
    for index in 0..count {
        let plain_len = layout.chunk_plain_len(index, header.total_size) as usize;
        let framed_len = overhead as usize + plain_len;
        let framed = &payload[offset..offset + framed_len];
        let opened = open_chunk(
            aead,
            &key,
            index,
            b"",
            layout.capacity(index) as u64,
            framed,
        )?;
        plaintext.extend_from_slice(&opened);
        offset += framed_len;
    }

    if plaintext.len() as u64 != header.total_size {
        return Err(SealError::SizeMismatch {
            expected: header.total_size,
            actual: plaintext.len() as u64,
        });
    }
    Ok(plaintext)
}

/// Re-derive the chunk key for an already-parsed container.
pub(crate) fn derive_for(
    descriptor: &Descriptor,
    suite: &CipherSuite,
    master: &MasterKey,
) -> SealResult<DerivedKey> {
    derive_chunk_key(master, &descriptor.salt, descriptor.kdf, suite)
}
