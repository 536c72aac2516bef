//! Capability traits over the cryptographic primitives, with one
//! implementation per backend.
//!
//! The container format and file engine only ever talk to these traits; the
//! concrete RustCrypto types never leak past this module. Cipher suites pick
//! an implementation by tag (see [`crate::suite`]).

use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305,
};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sealfs_core::{SealError, SealResult};

/// An AEAD cipher: seals plaintext into `ciphertext || tag` under a key,
/// nonce, and associated data.
pub trait AeadAlgorithm: Send + Sync {
    fn key_len(&self) -> usize;
    fn nonce_len(&self) -> usize;
    fn tag_len(&self) -> usize;

    /// Returns `ciphertext || tag`. Ciphertext length equals plaintext
    /// length for every backend here (stream ciphers with detached tags).
    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8])
        -> SealResult<Vec<u8>>;

    /// Inverse of [`seal`](Self::seal); input is `ciphertext || tag`.
    /// Any corruption of key, nonce, aad, or input yields
    /// [`SealError::AuthenticationFailed`].
    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], sealed: &[u8]) -> SealResult<Vec<u8>>;
}

/// A key derivation function: stretches `secret` (+ salt + info) into `out`.
pub trait KdfAlgorithm: Send + Sync {
    fn derive(&self, secret: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> SealResult<()>;
}

/// An unkeyed digest over a byte range.
pub trait DigestAlgorithm: Send + Sync {
    fn output_len(&self) -> usize;
    fn digest(&self, data: &[u8]) -> Vec<u8>;
}

/// A keyed MAC over a byte range. The key is independent of any AEAD key.
pub trait MacAlgorithm: Send + Sync {
    fn output_len(&self) -> usize;
    fn mac(&self, key: &[u8], data: &[u8]) -> Vec<u8>;
}

fn check_key_len(expected: usize, got: usize) -> SealResult<()> {
    if expected != got {
        return Err(SealError::InvalidKey(format!(
            "AEAD key must be {expected} bytes, got {got}"
        )));
    }
    Ok(())
}

/// XChaCha20-Poly1305: 256-bit key, 192-bit nonce, 128-bit tag.
pub struct XChaCha20Poly1305Aead;

impl AeadAlgorithm for XChaCha20Poly1305Aead {
    fn key_len(&self) -> usize {
        32
    }

    fn nonce_len(&self) -> usize {
        24
    }

    fn tag_len(&self) -> usize {
        16
    }

    fn seal(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> SealResult<Vec<u8>> {
        check_key_len(self.key_len(), key.len())?;
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| SealError::InvalidKey(e.to_string()))?;
        cipher
            .encrypt(nonce.into(), Payload { msg: plaintext, aad })
            .map_err(|e| SealError::InvalidKey(format!("AEAD seal failed: {e}")))
    }

    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], sealed: &[u8]) -> SealResult<Vec<u8>> {
        check_key_len(self.key_len(), key.len())?;
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| SealError::InvalidKey(e.to_string()))?;
        cipher
            .decrypt(nonce.into(), Payload { msg: sealed, aad })
            .map_err(|_| SealError::AuthenticationFailed)
    }
}

/// AES-256-GCM: 256-bit key, 96-bit nonce, 128-bit tag.
pub struct Aes256GcmAead;

impl AeadAlgorithm for Aes256GcmAead {
    fn key_len(&self) -> usize {
        32
    }

    fn nonce_len(&self) -> usize {
        12
    }

    fn tag_len(&self) -> usize {
        16
    }

    fn seal(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> SealResult<Vec<u8>> {
        check_key_len(self.key_len(), key.len())?;
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| SealError::InvalidKey(e.to_string()))?;
        cipher
            .encrypt(nonce.into(), Payload { msg: plaintext, aad })
            .map_err(|e| SealError::InvalidKey(format!("AEAD seal failed: {e}")))
    }

    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], sealed: &[u8]) -> SealResult<Vec<u8>> {
        check_key_len(self.key_len(), key.len())?;
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| SealError::InvalidKey(e.to_string()))?;
        cipher
            .decrypt(nonce.into(), Payload { msg: sealed, aad })
            .map_err(|_| SealError::AuthenticationFailed)
    }
}

/// Argon2id parameters, embedded in cipher-suite definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbkdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for PbkdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl PbkdfParams {
    /// Cheap parameters for tests; never use for real data.
    pub fn insecure_fast() -> Self {
        Self {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Argon2id password KDF. `info` is unused (Argon2 has no info input).
pub struct Argon2Pbkdf {
    pub params: PbkdfParams,
}

impl KdfAlgorithm for Argon2Pbkdf {
    fn derive(&self, secret: &[u8], salt: &[u8], _info: &[u8], out: &mut [u8]) -> SealResult<()> {
        let params = Params::new(
            self.params.mem_cost_kib,
            self.params.time_cost,
            self.params.parallelism,
            Some(out.len()),
        )
        .map_err(|e| SealError::InvalidKey(format!("invalid Argon2id params: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        argon2
            .hash_password_into(secret, salt, out)
            .map_err(|e| SealError::InvalidKey(format!("Argon2id KDF failed: {e}")))
    }
}

/// HKDF-SHA256. An empty salt is passed through as "no salt".
pub struct HkdfSha256;

impl KdfAlgorithm for HkdfSha256 {
    fn derive(&self, secret: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> SealResult<()> {
        let salt = if salt.is_empty() { None } else { Some(salt) };
        let hkdf = Hkdf::<Sha256>::new(salt, secret);
        hkdf.expand(info, out)
            .map_err(|e| SealError::InvalidKey(format!("HKDF expand failed: {e}")))
    }
}

/// BLAKE3 digest (32 bytes).
pub struct Blake3Digest;

impl DigestAlgorithm for Blake3Digest {
    fn output_len(&self) -> usize {
        32
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        blake3::hash(data).as_bytes().to_vec()
    }
}

/// SHA-256 digest (32 bytes).
pub struct Sha256Digest;

impl DigestAlgorithm for Sha256Digest {
    fn output_len(&self) -> usize {
        32
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }
}

/// BLAKE3 keyed MAC. Arbitrary-length keys are normalized to 32 bytes with
/// `blake3::derive_key` before keying the hash.
pub struct Blake3Mac;

const MAC_KEY_CONTEXT: &str = "sealfs 2025-01-10 stamp mac key";

impl MacAlgorithm for Blake3Mac {
    fn output_len(&self) -> usize {
        32
    }

    fn mac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let normalized = blake3::derive_key(MAC_KEY_CONTEXT, key);
        blake3::keyed_hash(&normalized, data).as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aeads() -> Vec<Box<dyn AeadAlgorithm>> {
        vec![Box::new(XChaCha20Poly1305Aead), Box::new(Aes256GcmAead)]
    }

    #[test]
    fn aead_seal_open_roundtrip() {
        for aead in aeads() {
            let key = vec![0x42u8; aead.key_len()];
            let nonce = vec![7u8; aead.nonce_len()];
            let sealed = aead.seal(&key, &nonce, b"aad", b"payload").unwrap();
            assert_eq!(sealed.len(), b"payload".len() + aead.tag_len());
            let opened = aead.open(&key, &nonce, b"aad", &sealed).unwrap();
            assert_eq!(opened, b"payload");
        }
    }

    #[test]
    fn aead_rejects_any_flipped_byte() {
        for aead in aeads() {
            let key = vec![0x42u8; aead.key_len()];
            let nonce = vec![7u8; aead.nonce_len()];
            let sealed = aead.seal(&key, &nonce, b"", b"payload").unwrap();
            for i in 0..sealed.len() {
                let mut tampered = sealed.clone();
                tampered[i] ^= 0x01;
                assert!(
                    matches!(
                        aead.open(&key, &nonce, b"", &tampered),
                        Err(SealError::AuthenticationFailed)
                    ),
                    "flipping byte {i} must fail authentication"
                );
            }
        }
    }

    #[test]
    fn aead_rejects_wrong_key_len() {
        let aead = XChaCha20Poly1305Aead;
        let nonce = vec![0u8; aead.nonce_len()];
        let result = aead.seal(&[0u8; 16], &nonce, b"", b"x");
        assert!(matches!(result, Err(SealError::InvalidKey(_))));
    }

    #[test]
    fn argon2_is_deterministic() {
        let kdf = Argon2Pbkdf {
            params: PbkdfParams::insecure_fast(),
        };
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        kdf.derive(b"passphrase", &[1u8; 16], b"", &mut a).unwrap();
        kdf.derive(b"passphrase", &[1u8; 16], b"", &mut b).unwrap();
        assert_eq!(a, b);

        let mut c = [0u8; 32];
        kdf.derive(b"passphrase", &[2u8; 16], b"", &mut c).unwrap();
        assert_ne!(a, c, "different salts must produce different keys");
    }

    #[test]
    fn hkdf_info_separates_domains() {
        let kdf = HkdfSha256;
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        kdf.derive(&[9u8; 32], b"salt-bytes", b"domain-a", &mut a)
            .unwrap();
        kdf.derive(&[9u8; 32], b"salt-bytes", b"domain-b", &mut b)
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn mac_depends_on_key_and_data() {
        let mac = Blake3Mac;
        let m1 = mac.mac(b"key-one", b"data");
        let m2 = mac.mac(b"key-two", b"data");
        let m3 = mac.mac(b"key-one", b"datb");
        assert_ne!(m1, m2);
        assert_ne!(m1, m3);
        assert_eq!(m1, mac.mac(b"key-one", b"data"));
    }

    #[test]
    fn digests_are_32_bytes() {
        assert_eq!(Blake3Digest.digest(b"x").len(), 32);
        assert_eq!(Sha256Digest.digest(b"x").len(), 32);
    }
}
