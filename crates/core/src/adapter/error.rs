//! Error types for the adapter module.

use std::path::PathBuf;
use thiserror::Error;

use crate::error::ConversionError;

/// Errors raised while invoking an external tool.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The tool's executable could not be found.
    #[error("Program not found: {program}")]
    ProgramNotFound { program: PathBuf },

    /// The process could not be started.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An argument template is malformed.
    #[error("Invalid argument template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// The tool exited successfully but left no output behind.
    #[error("Tool reported success but produced no output at {path}")]
    OutputMissing { path: PathBuf },

    /// The invocation was cancelled and the process terminated.
    #[error("Invocation cancelled")]
    Cancelled,

    /// I/O error around the invocation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Maps this error into the job-level taxonomy.
    pub fn into_conversion_error(self, adapter: &str) -> ConversionError {
        match self {
            Self::Cancelled => ConversionError::Cancelled,
            Self::Io(e) => ConversionError::Io(e),
            Self::OutputMissing { path } => {
                ConversionError::output_validation(path, "tool produced no output")
            }
            other => ConversionError::tool_execution(adapter, other.to_string(), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_conversion_error_mapping() {
        let spawn = AdapterError::Spawn {
            program: PathBuf::from("pandoc"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            spawn.into_conversion_error("pandoc").kind(),
            ErrorKind::ToolExecution
        );
        assert_eq!(
            AdapterError::Cancelled.into_conversion_error("pandoc").kind(),
            ErrorKind::Cancelled
        );
        let missing = AdapterError::OutputMissing {
            path: PathBuf::from("/tmp/out.pdf"),
        };
        assert_eq!(
            missing.into_conversion_error("ddjvu").kind(),
            ErrorKind::OutputValidation
        );
    }
}
