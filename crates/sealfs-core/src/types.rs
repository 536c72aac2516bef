use serde::{Deserialize, Serialize};

/// Strategy for turning a master key into the per-container chunk key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KdfType {
    /// Passphrase -> chunk key via the password KDF (Argon2id).
    Pbkdf,
    /// Raw symmetric master key -> chunk key via HKDF.
    Hkdf,
    /// Passphrase -> intermediate key via Argon2id, then HKDF with the
    /// container salt and a chunk-family info string. The default.
    PbkdfThenHkdf,
}

impl Default for KdfType {
    fn default() -> Self {
        KdfType::PbkdfThenHkdf
    }
}
