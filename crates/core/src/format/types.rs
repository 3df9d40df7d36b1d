//! Canonical format identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Canonical short tag naming a file format, independent of filename extension.
///
/// Tags are lowercase and aliases are folded on construction, so `"MD"`,
/// `"md"` and `"markdown"` all produce the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FormatId(Arc<str>);

impl FormatId {
    /// Creates a format identifier, normalizing case and aliases.
    pub fn new(tag: impl AsRef<str>) -> Self {
        let lowered = tag.as_ref().trim().trim_start_matches('.').to_ascii_lowercase();
        let canonical = match lowered.as_str() {
            "md" | "markdown" | "mkd" => "markdown",
            "htm" | "xhtml" => "html",
            "text" | "plain" => "txt",
            "jpeg" | "jpe" => "jpg",
            "tif" => "tiff",
            "yml" => "yaml",
            "latex" => "tex",
            "azw" => "azw3",
            "djv" => "djvu",
            other => other,
        };
        Self(Arc::from(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Preferred file extension for artifacts of this format.
    pub fn extension(&self) -> &str {
        match self.as_str() {
            "markdown" => "md",
            other => other,
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FormatId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for FormatId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<FormatId> for String {
    fn from(value: FormatId) -> Self {
        value.0.to_string()
    }
}

/// An ordered (source, target) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormatPair {
    pub from: FormatId,
    pub to: FormatId,
}

impl FormatPair {
    pub fn new(from: impl Into<FormatId>, to: impl Into<FormatId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Key used in statistics, e.g. `markdown_to_txt`.
    pub fn stats_key(&self) -> String {
        format!("{}_to_{}", self.from, self.to)
    }
}

impl fmt::Display for FormatPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_fold() {
        assert_eq!(FormatId::new("MD"), FormatId::new("markdown"));
        assert_eq!(FormatId::new(".jpeg"), FormatId::new("jpg"));
        assert_eq!(FormatId::new("LaTeX").as_str(), "tex");
        assert_eq!(FormatId::new("htm").as_str(), "html");
    }

    #[test]
    fn test_extension() {
        assert_eq!(FormatId::new("markdown").extension(), "md");
        assert_eq!(FormatId::new("pdf").extension(), "pdf");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&FormatId::new("md")).unwrap();
        assert_eq!(json, "\"markdown\"");
        let parsed: FormatId = serde_json::from_str("\"TEXT\"").unwrap();
        assert_eq!(parsed.as_str(), "txt");
    }

    #[test]
    fn test_stats_key() {
        let pair = FormatPair::new("md", "txt");
        assert_eq!(pair.stats_key(), "markdown_to_txt");
        assert_eq!(pair.to_string(), "markdown->txt");
    }
}
