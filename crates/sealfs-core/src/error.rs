use thiserror::Error;

pub type SealResult<T> = Result<T, SealError>;

/// Error taxonomy for the container format and file engine.
///
/// Parsing failures (`InvalidHeader`, `InvalidDescriptor`, `TruncatedInput`)
/// are surfaced before any chunk is decrypted. `AuthenticationFailed` covers
/// both tampering and a wrong master key; the two are deliberately
/// indistinguishable so decryption cannot be used as a key oracle.
#[derive(Debug, Error)]
pub enum SealError {
    #[error("invalid container header: {0}")]
    InvalidHeader(String),

    #[error("invalid container descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("unknown cipher suite: {0}")]
    UnknownCipherSuite(String),

    #[error("cipher suite does not support {0}")]
    UnsupportedKdf(&'static str),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("authentication failed: corrupted data or wrong key")]
    AuthenticationFailed,

    #[error("truncated input: {0}")]
    TruncatedInput(String),

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("integrity stamp not present")]
    StampMissing,

    #[error("integrity stamp does not match file contents")]
    StampMismatch,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
