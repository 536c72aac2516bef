//! Key derivation: master key (passphrase or raw) → per-container chunk key.
//!
//! Three strategies, selected by [`KdfType`]:
//! - `Pbkdf`: Argon2id(passphrase, salt) → chunk key
//! - `Hkdf`: HKDF-SHA256(raw master key, salt) → chunk key
//! - `PbkdfThenHkdf` (default): Argon2id(passphrase, salt) → intermediate,
//!   then HKDF-SHA256(intermediate, salt, info) → chunk key
//!
//! All three are deterministic: the same master key, salt, and suite always
//! reproduce the same chunk key, so a container can be reopened and appended
//! to without the derived key ever being stored.

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use sealfs_core::{KdfType, SealError, SealResult};

use crate::provider::{Argon2Pbkdf, HkdfSha256, KdfAlgorithm};
use crate::suite::CipherSuite;

/// Info string binding the chunk-family key to this format.
const CHUNK_KEY_INFO: &[u8] = b"sealfs.chunk-key.v1";

/// Info string for the nonce seed expanded from the chunk key.
const NONCE_SEED_INFO: &[u8] = b"sealfs.nonce-seed.v1";

/// A raw symmetric key of arbitrary length. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: Vec<u8>,
}

impl SymmetricKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Caller-supplied master secret. Borrowed by pack/open/derive calls, never
/// owned by a container.
#[derive(Debug, Clone)]
pub enum MasterKey {
    /// Opaque passphrase; only valid with the PBKDF-based strategies.
    Passphrase(SecretString),
    /// Raw symmetric key; only valid with `KdfType::Hkdf`.
    Raw(SymmetricKey),
}

impl MasterKey {
    pub fn passphrase(passphrase: impl Into<String>) -> Self {
        MasterKey::Passphrase(SecretString::from(passphrase.into()))
    }

    pub fn raw(bytes: Vec<u8>) -> Self {
        MasterKey::Raw(SymmetricKey::from_bytes(bytes))
    }
}

/// The chunk key plus the nonce seed expanded from it.
///
/// `nonce_for` is a pure function of (seed, chunk index); resealing chunk N
/// recomputes N's nonce without touching any other chunk's state.
pub struct DerivedKey {
    key: SymmetricKey,
    nonce_seed: [u8; 32],
}

impl DerivedKey {
    pub fn new(key: SymmetricKey) -> SealResult<Self> {
        let mut nonce_seed = [0u8; 32];
        HkdfSha256.derive(key.as_bytes(), &[], NONCE_SEED_INFO, &mut nonce_seed)?;
        Ok(Self { key, nonce_seed })
    }

    pub fn key_bytes(&self) -> &[u8] {
        self.key.as_bytes()
    }

    /// Deterministic nonce for a chunk index, truncated to the AEAD's nonce
    /// length. Distinct indices map to distinct nonces.
    pub fn nonce_for(&self, chunk_index: u64, nonce_len: usize) -> Vec<u8> {
        debug_assert!(nonce_len <= 32);
        let hash = blake3::keyed_hash(&self.nonce_seed, &chunk_index.to_le_bytes());
        hash.as_bytes()[..nonce_len].to_vec()
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.nonce_seed.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Derive the per-container chunk key.
///
/// Fails with [`SealError::InvalidKey`] when the master key's kind does not
/// match the strategy (e.g. a raw key supplied for `Pbkdf`), and with
/// [`SealError::UnsupportedKdf`] when the suite lacks the required
/// algorithm.
pub fn derive_chunk_key(
    master: &MasterKey,
    salt: &[u8],
    kdf: KdfType,
    suite: &CipherSuite,
) -> SealResult<DerivedKey> {
    let key_len = suite.aead.algorithm().key_len();
    let mut key = vec![0u8; key_len];

    match kdf {
        KdfType::Pbkdf => {
            let passphrase = require_passphrase(master, kdf)?;
            let pbkdf = suite_pbkdf(suite)?;
            pbkdf.derive(passphrase.expose_secret().as_bytes(), salt, &[], &mut key)?;
        }
        KdfType::Hkdf => {
            let raw = match master {
                MasterKey::Raw(key) => key,
                MasterKey::Passphrase(_) => {
                    return Err(SealError::InvalidKey(
                        "KdfType::Hkdf requires a raw symmetric master key".to_string(),
                    ))
                }
            };
            require_hkdf(suite)?;
            HkdfSha256.derive(raw.as_bytes(), salt, &[], &mut key)?;
        }
        KdfType::PbkdfThenHkdf => {
            let passphrase = require_passphrase(master, kdf)?;
            let pbkdf = suite_pbkdf(suite)?;
            require_hkdf(suite)?;

            let mut intermediate = [0u8; 32];
            pbkdf.derive(
                passphrase.expose_secret().as_bytes(),
                salt,
                &[],
                &mut intermediate,
            )?;
            let result = HkdfSha256.derive(&intermediate, salt, CHUNK_KEY_INFO, &mut key);
            intermediate.zeroize();
            result?;
        }
    }

    tracing::debug!(?kdf, suite = %suite.id, key_len, "derived chunk key");
    DerivedKey::new(SymmetricKey::from_bytes(key))
}

fn require_passphrase<'a>(master: &'a MasterKey, kdf: KdfType) -> SealResult<&'a SecretString> {
    match master {
        MasterKey::Passphrase(passphrase) => Ok(passphrase),
        MasterKey::Raw(_) => Err(SealError::InvalidKey(format!(
            "{kdf:?} requires a passphrase master key"
        ))),
    }
}

fn suite_pbkdf(suite: &CipherSuite) -> SealResult<Argon2Pbkdf> {
    let params = suite
        .pbkdf
        .ok_or(SealError::UnsupportedKdf("passphrase derivation (PBKDF)"))?;
    Ok(Argon2Pbkdf { params })
}

fn require_hkdf(suite: &CipherSuite) -> SealResult<()> {
    if !suite.hkdf {
        return Err(SealError::UnsupportedKdf("HKDF derivation"));
    }
    Ok(())
}
