//! sealfs-core: shared types and the error taxonomy used across the
//! sealfs workspace.

pub mod error;
pub mod types;

pub use error::{SealError, SealResult};
pub use types::KdfType;
