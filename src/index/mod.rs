//! The KeBaB index core: rolling hash, Bloom filter, cardinality estimator,
//! and the fragmentation scan.

pub mod bloom;
pub mod cardinality;
pub mod fragment;
pub mod kebab;
pub mod nthash;

use std::io::Read;

use thiserror::Error;

pub use bloom::FilterSizeMode;
pub use fragment::Fragment;
pub use kebab::{IndexParams, KebabIndex, KmerMode};

// Defaults shared with the CLI.
pub const DEFAULT_KMER_SIZE: usize = 20;
pub const DEFAULT_FP_RATE: f64 = 0.01;
pub const DEFAULT_MIN_MEM_LENGTH: usize = 20;

/// Errors surfaced by the index core.
#[derive(Debug, Error)]
pub enum KebabError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid index file: {0}")]
    InvalidIndexFile(String),
    #[error("i/o error")]
    Io(#[from] std::io::Error),
}

pub(crate) fn read_u64_le<R: Read>(reader: &mut R) -> Result<u64, KebabError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(map_read_err)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_u32_le<R: Read>(reader: &mut R) -> Result<u32, KebabError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(map_read_err)?;
    Ok(u32::from_le_bytes(buf))
}

/// A short read means a truncated index, not a transport failure.
fn map_read_err(e: std::io::Error) -> KebabError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        KebabError::InvalidIndexFile("truncated stream".into())
    } else {
        KebabError::Io(e)
    }
}
