//! Error taxonomy for a single conversion job.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::format::FormatId;

/// Coarse classification of a conversion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    FormatUnknown,
    ToolUnavailable,
    ChainPlanningFailure,
    ToolExecution,
    Timeout,
    LockContention,
    OutputValidation,
    Cancelled,
    Io,
}

impl ErrorKind {
    /// Whether failures of this kind are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ToolExecution | Self::Timeout | Self::Io)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::FormatUnknown => "format_unknown",
            Self::ToolUnavailable => "tool_unavailable",
            Self::ChainPlanningFailure => "chain_planning_failure",
            Self::ToolExecution => "tool_execution",
            Self::Timeout => "timeout",
            Self::LockContention => "lock_contention",
            Self::OutputValidation => "output_validation",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can end a conversion job.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Input is missing, unreadable, not a regular file, or too large.
    #[error("Invalid input {path}: {reason}")]
    Validation { path: PathBuf, reason: String },

    /// No detection method recognized the input.
    #[error("Could not detect format of {path}")]
    FormatUnknown { path: PathBuf },

    /// No installed adapter handles the pair and chaining could not help.
    #[error("No tool available for {from} -> {to}")]
    ToolUnavailable { from: FormatId, to: FormatId },

    /// No chain through the hub formats reaches the target.
    #[error("No conversion chain from {from} to {to} within {max_hops} hops")]
    ChainPlanningFailure {
        from: FormatId,
        to: FormatId,
        max_hops: usize,
    },

    /// An adapter ran and failed.
    #[error("{adapter} failed: {reason}")]
    ToolExecution {
        adapter: String,
        reason: String,
        stderr: Option<String>,
    },

    /// An adapter invocation exceeded its time budget.
    #[error("{adapter} timed out after {timeout_secs} seconds")]
    Timeout { adapter: String, timeout_secs: u64 },

    /// Another job currently owns the input.
    #[error("Input is locked by another conversion: {path}")]
    LockContention { path: PathBuf },

    /// The produced artifact is empty or malformed.
    #[error("Invalid output {path}: {reason}")]
    OutputValidation { path: PathBuf, reason: String },

    /// The run was cancelled.
    #[error("Conversion cancelled")]
    Cancelled,

    /// Local filesystem failure around the conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    pub fn validation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn tool_execution(
        adapter: impl Into<String>,
        reason: impl Into<String>,
        stderr: Option<String>,
    ) -> Self {
        Self::ToolExecution {
            adapter: adapter.into(),
            reason: reason.into(),
            stderr,
        }
    }

    pub fn output_validation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::OutputValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::FormatUnknown { .. } => ErrorKind::FormatUnknown,
            Self::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            Self::ChainPlanningFailure { .. } => ErrorKind::ChainPlanningFailure,
            Self::ToolExecution { .. } => ErrorKind::ToolExecution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::LockContention { .. } => ErrorKind::LockContention,
            Self::OutputValidation { .. } => ErrorKind::OutputValidation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this error is retryable.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ConversionError::tool_execution("pandoc", "exit 1", None).is_transient());
        assert!(ConversionError::Timeout {
            adapter: "pandoc".to_string(),
            timeout_secs: 5
        }
        .is_transient());
        assert!(ConversionError::Io(std::io::Error::other("disk")).is_transient());

        assert!(!ConversionError::validation("/a", "missing").is_transient());
        assert!(!ConversionError::Cancelled.is_transient());
        assert!(!ConversionError::output_validation("/a", "empty").is_transient());
        assert!(!ConversionError::LockContention {
            path: PathBuf::from("/a")
        }
        .is_transient());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::ChainPlanningFailure.to_string(), "chain_planning_failure");
        let json = serde_json::to_string(&ErrorKind::LockContention).unwrap();
        assert_eq!(json, "\"lock_contention\"");
    }

    #[test]
    fn test_error_messages() {
        let err = ConversionError::ChainPlanningFailure {
            from: FormatId::new("svg"),
            to: FormatId::new("docx"),
            max_hops: 2,
        };
        assert_eq!(
            err.to_string(),
            "No conversion chain from svg to docx within 2 hops"
        );
    }
}
