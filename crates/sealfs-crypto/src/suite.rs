//! Cipher suites and the suite registry.
//!
//! A [`CipherSuite`] is plain serde data naming one algorithm per concern
//! (AEAD, digest, MAC) plus KDF parameters. Suites travel as JSON: a
//! registry can be loaded from a JSON document, and a container descriptor
//! can embed the full suite body so the file is self-describing.
//!
//! [`SuiteRegistry`] is an explicit object passed into the container/engine
//! constructors. There is no process-wide singleton; tests run isolated
//! registries side by side.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sealfs_core::{SealError, SealResult};

use crate::provider::{
    AeadAlgorithm, Aes256GcmAead, Blake3Digest, Blake3Mac, DigestAlgorithm, MacAlgorithm,
    PbkdfParams, Sha256Digest, XChaCha20Poly1305Aead,
};

/// AEAD cipher selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AeadKind {
    XChaCha20Poly1305,
    Aes256Gcm,
}

impl AeadKind {
    pub fn algorithm(&self) -> &'static dyn AeadAlgorithm {
        match self {
            AeadKind::XChaCha20Poly1305 => &XChaCha20Poly1305Aead,
            AeadKind::Aes256Gcm => &Aes256GcmAead,
        }
    }
}

/// Digest selector for integrity stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestKind {
    Blake3,
    Sha256,
}

impl DigestKind {
    pub fn algorithm(&self) -> &'static dyn DigestAlgorithm {
        match self {
            DigestKind::Blake3 => &Blake3Digest,
            DigestKind::Sha256 => &Sha256Digest,
        }
    }
}

/// MAC selector for integrity stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacKind {
    Blake3Keyed,
}

impl MacKind {
    pub fn algorithm(&self) -> &'static dyn MacAlgorithm {
        match self {
            MacKind::Blake3Keyed => &Blake3Mac,
        }
    }
}

/// A complete cipher-suite definition.
///
/// `pbkdf: None` means the suite cannot serve passphrase-based derivation;
/// `hkdf: false` means it cannot serve HKDF-based derivation. Both gaps
/// surface as [`SealError::UnsupportedKdf`] at derive time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CipherSuite {
    pub id: String,
    pub aead: AeadKind,
    pub digest: DigestKind,
    pub mac: MacKind,
    #[serde(default)]
    pub pbkdf: Option<PbkdfParams>,
    #[serde(default = "default_true")]
    pub hkdf: bool,
}

fn default_true() -> bool {
    true
}

impl CipherSuite {
    /// Default suite: XChaCha20-Poly1305 + BLAKE3, Argon2id at production
    /// cost.
    pub fn xchacha20_default() -> Self {
        Self {
            id: "xchacha20poly1305-argon2id".to_string(),
            aead: AeadKind::XChaCha20Poly1305,
            digest: DigestKind::Blake3,
            mac: MacKind::Blake3Keyed,
            pbkdf: Some(PbkdfParams::default()),
            hkdf: true,
        }
    }

    /// AES-256-GCM + SHA-256 alternative.
    pub fn aes256gcm() -> Self {
        Self {
            id: "aes256gcm-argon2id".to_string(),
            aead: AeadKind::Aes256Gcm,
            digest: DigestKind::Sha256,
            mac: MacKind::Blake3Keyed,
            pbkdf: Some(PbkdfParams::default()),
            hkdf: true,
        }
    }

    pub fn to_json(&self) -> SealResult<String> {
        serde_json::to_string(self)
            .map_err(|e| SealError::InvalidDescriptor(format!("suite serialization: {e}")))
    }

    pub fn from_json(json: &str) -> SealResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SealError::InvalidDescriptor(format!("suite deserialization: {e}")))
    }
}

/// Registry of cipher suites, resolved by id.
#[derive(Debug, Clone, Default)]
pub struct SuiteRegistry {
    suites: HashMap<String, CipherSuite>,
}

impl SuiteRegistry {
    /// An empty registry (suites must be registered or embedded).
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in suites.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CipherSuite::xchacha20_default());
        registry.register(CipherSuite::aes256gcm());
        registry
    }

    /// Register or replace a suite under its own id.
    pub fn register(&mut self, suite: CipherSuite) {
        self.suites.insert(suite.id.clone(), suite);
    }

    pub fn resolve(&self, id: &str) -> SealResult<&CipherSuite> {
        self.suites
            .get(id)
            .ok_or_else(|| SealError::UnknownCipherSuite(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.suites.contains_key(id)
    }

    /// Load suites from a JSON array and register them all.
    pub fn load_json(&mut self, json: &str) -> SealResult<usize> {
        let suites: Vec<CipherSuite> = serde_json::from_str(json)
            .map_err(|e| SealError::InvalidDescriptor(format!("suite registry JSON: {e}")))?;
        let count = suites.len();
        for suite in suites {
            self.register(suite);
        }
        Ok(count)
    }
}
