//! Types for the processor module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::adapter::ConversionOptions;
use crate::error::{ConversionError, ErrorKind};
use crate::format::{FormatId, FormatPair};

/// A request to convert one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub target: FormatId,
    #[serde(default)]
    pub options: ConversionOptions,
    /// Explicit destination. Takes precedence over `output_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Directory for the derived destination; defaults to the input's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Skips detection when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_format: Option<FormatId>,
    /// Detect and plan only.
    #[serde(default)]
    pub dry_run: bool,
}

impl ConversionRequest {
    pub fn new(input_path: impl Into<PathBuf>, target: impl Into<FormatId>) -> Self {
        Self {
            input_path: input_path.into(),
            target: target.into(),
            options: ConversionOptions::default(),
            output_path: None,
            output_dir: None,
            source_format: None,
            dry_run: false,
        }
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_source_format(mut self, format: impl Into<FormatId>) -> Self {
        self.source_format = Some(format.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Where the output will be written:
    /// `<output_dir or input dir>/<input stem>.<target extension>` unless an
    /// explicit path was given.
    pub fn resolved_output_path(&self) -> PathBuf {
        if let Some(ref path) = self.output_path {
            return path.clone();
        }
        let stem = self
            .input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let file_name = format!("{}.{}", stem, self.target.extension());
        match self.output_dir {
            Some(ref dir) => dir.join(file_name),
            None => self
                .input_path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(file_name),
        }
    }
}

/// Final status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Success,
    Failure,
    /// Dry run: the strategy was resolved but nothing was executed.
    Planned,
}

/// Outcome of one conversion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_format: Option<FormatId>,
    pub target: FormatId,
    pub status: ConversionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Strategy attempts made (0 when the job ended before executing).
    pub attempts: u32,
    pub duration_secs: f64,
    pub input_size: u64,
    pub cache_hit: bool,
    /// Human-readable strategy, e.g. `ddjvu:djvu->pdf, pdf2docx:pdf->docx`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl ConversionResult {
    /// A result for `request` that has not succeeded (yet).
    pub fn new(job_id: impl Into<String>, request: &ConversionRequest) -> Self {
        Self {
            job_id: job_id.into(),
            input_path: request.input_path.clone(),
            output_path: request.resolved_output_path(),
            source_format: request.source_format.clone(),
            target: request.target.clone(),
            status: ConversionStatus::Failure,
            error_kind: None,
            error: None,
            attempts: 0,
            duration_secs: 0.0,
            input_size: 0,
            cache_hit: false,
            strategy: None,
        }
    }

    /// A failed result carrying `error`.
    pub fn failed(job_id: impl Into<String>, request: &ConversionRequest, error: &ConversionError) -> Self {
        Self::new(job_id, request).with_error(error)
    }

    pub fn with_error(mut self, error: &ConversionError) -> Self {
        self.status = ConversionStatus::Failure;
        self.error_kind = Some(error.kind());
        self.error = Some(error.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ConversionStatus::Success
    }

    pub fn is_failure(&self) -> bool {
        self.status == ConversionStatus::Failure
    }

    /// Source and target, once the source is known.
    pub fn format_pair(&self) -> Option<FormatPair> {
        self.source_format
            .as_ref()
            .map(|from| FormatPair::new(from.clone(), self.target.clone()))
    }
}
