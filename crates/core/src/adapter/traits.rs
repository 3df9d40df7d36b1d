//! Trait definitions for the adapter module.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::AdapterError;
use super::types::{ExitStatus, Invocation};
use crate::format::{FormatId, FormatPair};

/// An external tool that converts between a fixed set of format pairs.
///
/// Adapters are stateless: all per-call data travels in the [`Invocation`].
/// The orchestration core never builds command lines itself.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Returns the name of this adapter.
    fn name(&self) -> &str;

    /// Returns every (source, target) pair this adapter converts.
    fn supported_pairs(&self) -> &[FormatPair];

    /// Ranking among adapters supporting the same pair; higher wins.
    fn capability_score(&self) -> i32;

    /// Whether a run should refuse to start when no critical adapter exists.
    fn is_critical(&self) -> bool {
        false
    }

    /// Checks that the tool is installed and runnable on this host.
    async fn probe(&self) -> bool;

    /// Runs one conversion.
    ///
    /// When `cancel` fires, the adapter terminates its process and returns
    /// [`AdapterError::Cancelled`].
    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus, AdapterError>;

    /// Whether this adapter handles the exact pair.
    fn supports(&self, from: &FormatId, to: &FormatId) -> bool {
        self.supported_pairs()
            .iter()
            .any(|p| &p.from == from && &p.to == to)
    }
}
