use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::adapter::ConversionOptions;
use crate::format::FormatId;

const HASH_CHUNK: usize = 64 * 1024;

/// Identity of a cached artifact: what went in, how, and what came out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// SHA-256 hex of the input bytes.
    pub content_hash: String,
    /// First 16 hex characters of the options digest.
    pub options_hash: String,
    pub output_format: FormatId,
}

impl CacheKey {
    pub fn new(
        content_hash: impl Into<String>,
        options: &ConversionOptions,
        output_format: FormatId,
        salt: &str,
    ) -> Self {
        Self::with_source(content_hash, options, None, output_format, salt)
    }

    /// Key for a conversion whose source format was forced rather than
    /// detected.
    pub fn with_source(
        content_hash: impl Into<String>,
        options: &ConversionOptions,
        source: Option<&FormatId>,
        output_format: FormatId,
        salt: &str,
    ) -> Self {
        Self {
            content_hash: content_hash.into(),
            options_hash: options.options_hash_with_source(salt, source),
            output_format,
        }
    }

    /// Hashes `input` and builds its key.
    pub async fn for_input(
        input: &Path,
        options: &ConversionOptions,
        source: Option<&FormatId>,
        output_format: FormatId,
        salt: &str,
    ) -> std::io::Result<Self> {
        let content = content_hash(input).await?;
        Ok(Self::with_source(content, options, source, output_format, salt))
    }

    /// `{content_hash}_{output_format}_{options_hash}`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}",
            self.content_hash, self.output_format, self.options_hash
        )
    }

    /// Inverse of [`file_name`](Self::file_name).
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let mut parts = name.splitn(3, '_');
        let content_hash = parts.next()?;
        let format = parts.next()?;
        let options_hash = parts.next()?;
        if content_hash.len() != 64 || options_hash.is_empty() || format.is_empty() {
            return None;
        }
        Some(Self {
            content_hash: content_hash.to_string(),
            options_hash: options_hash.to_string(),
            output_format: FormatId::new(format),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Streams `path` through SHA-256 and returns the lowercase hex digest.
pub async fn content_hash(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
