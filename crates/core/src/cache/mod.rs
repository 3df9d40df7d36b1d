//! Content-addressed conversion cache.
//!
//! Outputs are stored under `{content_hash}_{output_format}_{options_hash}`
//! so that the same bytes converted with the same options to the same format
//! are produced once.

mod key;
mod manager;

pub use key::{content_hash, CacheKey};
pub use manager::{CacheEntry, CacheManager, PruneReport};

use std::path::PathBuf;
use thiserror::Error;

use crate::error::ConversionError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache entry disappeared: {path}")]
    EntryMissing { path: PathBuf },

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CacheError> for ConversionError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Io(e) => ConversionError::Io(e),
            CacheError::EntryMissing { path } => ConversionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cache entry disappeared: {}", path.display()),
            )),
        }
    }
}
