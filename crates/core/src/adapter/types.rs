//! Types shared between adapters and the orchestration core.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::format::FormatId;

/// Conversion-affecting settings passed to adapters.
///
/// Every field takes part in the options hash, so two requests that differ
/// in any setting never share a cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    /// Output quality (0-100) for lossy targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Text encoding for text targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// OCR language code (e.g. "eng", "deu+fra").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_language: Option<String>,
    /// Compression level (0-9).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<u8>,
    /// Free-form settings available to argument templates by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ConversionOptions {
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality.min(100));
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_ocr_language(mut self, language: impl Into<String>) -> Self {
        self.ocr_language = Some(language.into());
        self
    }

    pub fn with_compression(mut self, level: u8) -> Self {
        self.compression = Some(level.min(9));
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Looks up a setting by its template placeholder name.
    pub fn get(&self, name: &str) -> Option<String> {
        match name {
            "quality" => self.quality.map(|q| q.to_string()),
            "encoding" => self.encoding.clone(),
            "ocr_lang" | "ocr_language" => self.ocr_language.clone(),
            "compression" => self.compression.map(|c| c.to_string()),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Short digest of the canonical JSON form of these options.
    ///
    /// Field order is fixed by the struct and `extra` is ordered, so equal
    /// options always hash equally. `salt` is mixed in first.
    pub fn options_hash(&self, salt: &str) -> String {
        self.options_hash_with_source(salt, None)
    }

    /// Like [`options_hash`](Self::options_hash), but also folds in a forced
    /// source format, which changes the strategy that runs.
    pub fn options_hash_with_source(&self, salt: &str, source: Option<&FormatId>) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        if let Some(source) = source {
            hasher.update([0u8]);
            hasher.update(b"source=");
            hasher.update(source.as_str().as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

/// One adapter invocation: convert `input` (in `from`) into `output` (in `to`).
#[derive(Debug, Clone)]
pub struct Invocation {
    pub input: PathBuf,
    pub output: PathBuf,
    pub from: FormatId,
    pub to: FormatId,
    pub options: ConversionOptions,
}

/// How an adapter's external process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// Tail of the process's diagnostic output.
    pub stderr: String,
}

impl ExitStatus {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_hash_is_stable() {
        let a = ConversionOptions::default().with_quality(80).with_encoding("UTF-8");
        let b = ConversionOptions::default().with_encoding("UTF-8").with_quality(80);
        assert_eq!(a.options_hash(""), b.options_hash(""));
        assert_eq!(a.options_hash("").len(), 16);
        assert_eq!(a.options_hash("s"), a.options_hash_with_source("s", None));
    }

    #[test]
    fn test_options_hash_separates_settings() {
        let base = ConversionOptions::default();
        let hashes = [
            base.options_hash(""),
            base.clone().with_quality(80).options_hash(""),
            base.clone().with_encoding("latin1").options_hash(""),
            base.clone().with_ocr_language("deu").options_hash(""),
            base.clone().with_compression(6).options_hash(""),
            base.clone().with_extra("dpi", "300").options_hash(""),
            base.options_hash("v2"),
            base.options_hash_with_source("", Some(&FormatId::new("txt"))),
            base.options_hash_with_source("", Some(&FormatId::new("markdown"))),
        ];
        let unique: std::collections::HashSet<_> = hashes.iter().collect();
        assert_eq!(unique.len(), hashes.len());
    }

    #[test]
    fn test_get_by_placeholder_name() {
        let options = ConversionOptions::default()
            .with_quality(150)
            .with_ocr_language("eng")
            .with_extra("dpi", "300");
        assert_eq!(options.get("quality").as_deref(), Some("100"));
        assert_eq!(options.get("ocr_lang").as_deref(), Some("eng"));
        assert_eq!(options.get("dpi").as_deref(), Some("300"));
        assert_eq!(options.get("encoding"), None);
    }

    #[test]
    fn test_exit_status() {
        assert!(ExitStatus::success().is_success());
        assert!(!ExitStatus::failure(2, "boom").is_success());
    }
}
