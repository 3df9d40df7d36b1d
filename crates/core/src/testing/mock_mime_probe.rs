//! Mock MIME probe for testing.

use async_trait::async_trait;
use std::path::Path;

use crate::format::MimeProbe;

/// MIME probe that gives the same answer for every file.
#[derive(Debug, Clone, Default)]
pub struct MockMimeProbe {
    answer: Option<String>,
}

impl MockMimeProbe {
    /// Always answers `mime`.
    pub fn fixed(mime: &str) -> Self {
        Self {
            answer: Some(mime.to_string()),
        }
    }

    /// Never answers.
    pub fn silent() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MimeProbe for MockMimeProbe {
    fn name(&self) -> &str {
        "mock"
    }

    async fn mime_type(&self, _path: &Path) -> Option<String> {
        self.answer.clone()
    }
}
