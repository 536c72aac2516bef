//! sealfs-store: the encrypted container format and the random-access
//! chunked file engine built on it.
//!
//! On-disk layout (whole-buffer and file forms share it):
//! ```text
//! [header: "SEAL" | version:2 | total_plaintext_size:8 | descriptor_size:4]
//! [descriptor: JSON {kdf, salt, chunk sizes, streaming, suite id/body}]
//! [chunk 0: nonce | tag | ciphertext]   -- up to first_chunk_max_size bytes
//! [chunk 1: nonce | tag | ciphertext]   -- up to chunk_max_size bytes
//! ...
//! [optional integrity stamp trailer]
//! ```
//!
//! - [`container`]: header/descriptor codec and whole-buffer
//!   [`pack`](container::pack)/[`unpack`](container::unpack).
//! - [`engine`]: [`ChunkedFile`](engine::ChunkedFile), file-like
//!   open/read/write/seek/truncate over sealed chunks, including an
//!   append-only streaming mode.
//! - [`stamp`]: trailing digest/MAC records for whole-file tamper evidence.

pub mod container;
pub mod engine;
pub mod stamp;

pub use container::{pack, unpack, Descriptor, Header, PackOptions};
pub use engine::{ChunkedFile, EngineOptions, OpenMode};
pub use stamp::{check_stamp_digest, stamp_digest, stamp_mac, verify_stamp_mac};
