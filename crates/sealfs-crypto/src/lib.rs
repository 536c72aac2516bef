//! sealfs-crypto: crypto provider, cipher suites, key derivation, and the
//! per-chunk AEAD codec.
//!
//! Key hierarchy:
//! ```text
//! Master key (passphrase or raw 256-bit symmetric key)
//!   └── Chunk key (per container; Argon2id, HKDF-SHA256, or both, with the
//!       container salt)
//!         └── Nonce seed (HKDF-SHA256 from the chunk key)
//!               └── Chunk nonce = BLAKE3-keyed(nonce_seed, chunk_index)
//! ```
//!
//! Nonces are a pure function of the derived key and the chunk index, so a
//! chunk can be resealed without reading any other chunk and a reopened
//! container re-derives everything from the master key + stored salt.
//!
//! The actual primitives live behind the capability traits in [`provider`];
//! nothing in this crate implements a cipher itself.

pub mod chunk;
pub mod keyderive;
pub mod provider;
pub mod suite;

pub use chunk::{open_chunk, seal_chunk, ChunkLayout, ChunkLocation};
pub use keyderive::{derive_chunk_key, DerivedKey, MasterKey, SymmetricKey};
pub use provider::{AeadAlgorithm, DigestAlgorithm, KdfAlgorithm, MacAlgorithm, PbkdfParams};
pub use suite::{AeadKind, CipherSuite, DigestKind, MacKind, SuiteRegistry};
