//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the engine's external
//! collaborators, so the whole pipeline can be exercised without any
//! converter installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use metamorph_core::testing::{fixtures, MockAdapter};
//!
//! let pandoc = Arc::new(MockAdapter::new("pandoc", &[("md", "txt")]));
//! let config = fixtures::test_config(temp_dir.path());
//!
//! // Build a registry from the mock and run conversions...
//! ```

mod mock_adapter;
mod mock_mime_probe;

pub use mock_adapter::{payload_header, MockAdapter, MockOutput};
pub use mock_mime_probe::MockMimeProbe;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};

    use crate::config::Config;

    /// Configuration rooted in `root` with fast retries and no `file` probe.
    pub fn test_config(root: &Path) -> Config {
        let mut config = Config::default().with_data_root(root.join("data"));
        config.detection.mime_probe = false;
        config.retry.delay_ms = 10;
        config.retry.max_delay_ms = 50;
        config.scheduler.max_concurrency = 4;
        config.scheduler.grace_period_secs = 1;
        config.stats.persist = false;
        config.events.enabled = false;
        config
    }

    /// Writes an input file under `dir` and returns its path.
    pub async fn write_input(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .expect("create input dir");
        }
        tokio::fs::write(&path, bytes).await.expect("write input");
        path
    }

    /// A minimal DjVu header.
    pub fn djvu_bytes() -> Vec<u8> {
        let mut bytes = b"AT&TFORM\x00\x00\x10\x00DJVUINFO".to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        bytes
    }
}
