//! Per-input mutual exclusion.
//!
//! At most one conversion may work on an input path at a time. Ownership is
//! a lease file carrying an owner token and an expiry that the holder keeps
//! renewing, so a crashed holder's lease lapses instead of blocking forever.

mod lease;
mod manager;

pub use lease::Lease;
pub use manager::{LockGuard, LockManager};

use std::path::PathBuf;
use thiserror::Error;

use crate::error::ConversionError;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Input is locked by another conversion: {path}")]
    Contention { path: PathBuf },

    #[error("Lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LockError> for ConversionError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Contention { path } => ConversionError::LockContention { path },
            LockError::Io(e) => ConversionError::Io(e),
        }
    }
}
