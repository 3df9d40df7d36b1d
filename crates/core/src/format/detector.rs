//! Format detection in strict priority order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::heuristics::sniff_text;
use super::signatures::{format_for_extension, format_for_mime, sniff_magic, HEADER_LEN};
use super::types::FormatId;

/// Reports a MIME type for a file.
#[async_trait]
pub trait MimeProbe: Send + Sync {
    /// Returns the name of this probe implementation.
    fn name(&self) -> &str;

    /// Returns the MIME type of the file, or `None` if it cannot tell.
    async fn mime_type(&self, path: &Path) -> Option<String>;
}

/// MIME probe backed by the `file` utility.
pub struct FileCommandProbe {
    program: PathBuf,
    timeout: Duration,
}

impl FileCommandProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Whether the `file` binary can be executed on this host.
    pub async fn is_available(&self) -> bool {
        let result = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        result.is_ok()
    }
}

#[async_trait]
impl MimeProbe for FileCommandProbe {
    fn name(&self) -> &str {
        "file"
    }

    async fn mime_type(&self, path: &Path) -> Option<String> {
        let output = timeout(
            self.timeout,
            Command::new(&self.program)
                .args(["--brief", "--mime-type", "--"])
                .arg(path)
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output(),
        )
        .await
        .ok()?
        .ok()?;

        if !output.status.success() {
            return None;
        }
        let mime = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if mime.is_empty() {
            None
        } else {
            Some(mime)
        }
    }
}

/// Which detection method produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Signature,
    Mime,
    Content,
    Extension,
}

/// A successful detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub format: FormatId,
    pub method: DetectionMethod,
}

/// Classifies files by content and name.
///
/// Methods are tried in order (signature, MIME, content heuristics,
/// extension) and the first one that answers wins.
#[derive(Clone, Default)]
pub struct FormatDetector {
    mime_probe: Option<Arc<dyn MimeProbe>>,
}

impl FormatDetector {
    /// Creates a detector without a MIME probe.
    pub fn new() -> Self {
        Self { mime_probe: None }
    }

    /// Adds a MIME probe as the second detection method.
    pub fn with_mime_probe(mut self, probe: Arc<dyn MimeProbe>) -> Self {
        self.mime_probe = Some(probe);
        self
    }

    /// Builds a detector from configuration, enabling the `file` probe only
    /// when it is requested and installed.
    pub async fn from_config(config: &crate::config::DetectionConfig) -> Self {
        if !config.mime_probe {
            return Self::new();
        }
        let probe = FileCommandProbe::new(&config.file_command);
        if probe.is_available().await {
            Self::new().with_mime_probe(Arc::new(probe))
        } else {
            debug!("MIME probe disabled: {:?} is not available", config.file_command);
            Self::new()
        }
    }

    /// Detects the format of a file.
    pub async fn detect(&self, path: &Path) -> std::io::Result<Option<Detection>> {
        let file = tokio::fs::File::open(path).await?;
        let mut header = Vec::with_capacity(HEADER_LEN);
        file.take(HEADER_LEN as u64).read_to_end(&mut header).await?;

        if let Some(format) = sniff_magic(&header) {
            return Ok(Some(Detection {
                format,
                method: DetectionMethod::Signature,
            }));
        }

        if let Some(ref probe) = self.mime_probe {
            if let Some(format) = probe
                .mime_type(path)
                .await
                .and_then(|mime| format_for_mime(&mime))
            {
                return Ok(Some(Detection {
                    format,
                    method: DetectionMethod::Mime,
                }));
            }
        }

        Ok(Self::detect_offline(path, &header))
    }

    /// Content heuristics and extension lookup.
    fn detect_offline(path: &Path, header: &[u8]) -> Option<Detection> {
        if let Some(format) = sniff_text(header) {
            return Some(Detection {
                format,
                method: DetectionMethod::Content,
            });
        }

        path.extension()
            .and_then(|e| e.to_str())
            .and_then(format_for_extension)
            .map(|format| Detection {
                format,
                method: DetectionMethod::Extension,
            })
    }
}
