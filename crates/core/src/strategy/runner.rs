//! Execution of a single strategy attempt.

use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{ConversionStrategy, Hop};
use crate::adapter::{ConversionOptions, Invocation};
use crate::error::ConversionError;
use crate::format::{artifact_looks_valid, FormatId, HEADER_LEN};
use crate::metrics;

/// Runs the hops of a strategy once.
///
/// Intermediates live in a scratch directory under `work_dir` and each one is
/// deleted as soon as the following hop has consumed it. The final artifact
/// is written next to the destination under a hidden temporary name,
/// validated, then renamed into place, so the destination is either the
/// complete new output or untouched.
#[derive(Debug, Clone)]
pub struct StrategyRunner {
    work_dir: PathBuf,
    invocation_timeout: Duration,
}

impl StrategyRunner {
    pub fn new(work_dir: impl Into<PathBuf>, invocation_timeout: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            invocation_timeout,
        }
    }

    pub fn invocation_timeout(&self) -> Duration {
        self.invocation_timeout
    }

    /// Produces `output` from `input`.
    pub async fn run(
        &self,
        strategy: &ConversionStrategy,
        input: &Path,
        output: &Path,
        options: &ConversionOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        if cancel.is_cancelled() {
            return Err(ConversionError::Cancelled);
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(output, &strategy.target);

        let result = self
            .produce(strategy, input, &partial, options, cancel)
            .await;
        let result = match result {
            Ok(()) => tokio::fs::rename(&partial, output)
                .await
                .map_err(ConversionError::from),
            Err(e) => Err(e),
        };

        if result.is_err() {
            remove_quietly(&partial).await;
        }
        result
    }

    async fn produce(
        &self,
        strategy: &ConversionStrategy,
        input: &Path,
        partial: &Path,
        options: &ConversionOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        if strategy.is_identity() {
            tokio::fs::copy(input, partial).await?;
            return validate_artifact(partial, &strategy.target).await;
        }

        let scratch = if strategy.is_chain() {
            tokio::fs::create_dir_all(&self.work_dir).await?;
            Some(
                tempfile::Builder::new()
                    .prefix("chain-")
                    .tempdir_in(&self.work_dir)?,
            )
        } else {
            None
        };

        let last = strategy.hops.len() - 1;
        let mut current = input.to_path_buf();
        for (index, hop) in strategy.hops.iter().enumerate() {
            let hop_output = match (&scratch, index == last) {
                (Some(dir), false) => dir
                    .path()
                    .join(format!("hop{}.{}", index + 1, hop.to.extension())),
                _ => partial.to_path_buf(),
            };

            let invocation = Invocation {
                input: current.clone(),
                output: hop_output.clone(),
                from: hop.from.clone(),
                to: hop.to.clone(),
                options: options.clone(),
            };
            let outcome = self.invoke_hop(hop, &invocation, cancel).await;

            // The previous intermediate has been consumed either way.
            if index > 0 {
                remove_quietly(&current).await;
            }
            outcome?;
            validate_artifact(&hop_output, &hop.to).await?;
            current = hop_output;
        }

        Ok(())
    }

    /// One adapter invocation under the per-invocation time budget.
    async fn invoke_hop(
        &self,
        hop: &Hop,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        let name = hop.adapter.name();
        let token = cancel.child_token();
        debug!("Invoking {:?} on {}", hop, invocation.input.display());

        let invoke = hop.adapter.invoke(invocation, &token);
        tokio::pin!(invoke);
        let finished = tokio::select! {
            result = &mut invoke => Some(result),
            _ = tokio::time::sleep(self.invocation_timeout) => None,
        };

        let result = match finished {
            Some(result) => result,
            None => {
                warn!(
                    "{} exceeded {}s on {}; terminating",
                    name,
                    self.invocation_timeout.as_secs(),
                    invocation.input.display()
                );
                token.cancel();
                let _ = invoke.await;
                metrics::ADAPTER_INVOCATIONS
                    .with_label_values(&[name, "timeout"])
                    .inc();
                return Err(ConversionError::Timeout {
                    adapter: name.to_string(),
                    timeout_secs: self.invocation_timeout.as_secs(),
                });
            }
        };

        match result {
            Ok(status) if status.is_success() => {
                metrics::ADAPTER_INVOCATIONS
                    .with_label_values(&[name, "success"])
                    .inc();
                Ok(())
            }
            Ok(status) => {
                metrics::ADAPTER_INVOCATIONS
                    .with_label_values(&[name, "failure"])
                    .inc();
                let reason = match status.code {
                    Some(code) => format!("exited with code {}", code),
                    None => "terminated by signal".to_string(),
                };
                let stderr = (!status.stderr.is_empty()).then_some(status.stderr);
                Err(ConversionError::tool_execution(name, reason, stderr))
            }
            Err(e) => {
                let err = e.into_conversion_error(name);
                let outcome = if matches!(err, ConversionError::Cancelled) {
                    "cancelled"
                } else {
                    "failure"
                };
                metrics::ADAPTER_INVOCATIONS
                    .with_label_values(&[name, outcome])
                    .inc();
                Err(err)
            }
        }
    }
}

/// Hidden sibling of `output` carrying the target's extension, so tools that
/// infer the format from the file name still work.
fn partial_path(output: &Path, target: &FormatId) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let token = uuid::Uuid::new_v4().simple().to_string();
    let name = format!(".{}.{}.partial.{}", stem, &token[..8], target.extension());
    output.with_file_name(name)
}

async fn validate_artifact(path: &Path, format: &FormatId) -> Result<(), ConversionError> {
    let header = match read_header(path).await {
        Ok(header) => header,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConversionError::output_validation(
                path,
                "tool produced no output",
            ))
        }
        Err(e) => return Err(e.into()),
    };
    artifact_looks_valid(format, &header)
        .map_err(|reason| ConversionError::output_validation(path, reason))
}

async fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64).read_to_end(&mut header).await?;
    Ok(header)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ToolAdapter;
    use crate::error::ErrorKind;
    use crate::testing::{MockAdapter, MockOutput};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn f(tag: &str) -> FormatId {
        FormatId::new(tag)
    }

    async fn dir_entries(path: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(path).await else {
            return names;
        };
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_direct_conversion_places_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("doc.md");
        tokio::fs::write(&input, b"# Title\ntext").await.unwrap();
        let output = dir.path().join("out").join("doc.txt");

        let adapter = Arc::new(MockAdapter::new("pandoc", &[("md", "txt")]));
        let strategy = ConversionStrategy::direct(adapter.clone(), f("md"), f("txt"));
        let runner = StrategyRunner::new(dir.path().join("work"), Duration::from_secs(5));

        runner
            .run(&strategy, &input, &output, &ConversionOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"# Title\ntext");
        assert_eq!(dir_entries(&dir.path().join("out")).await, vec!["doc.txt"]);
        assert_eq!(adapter.invocation_count().await, 1);
    }

    #[tokio::test]
    async fn test_chain_removes_intermediates() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("scan.djvu");
        tokio::fs::write(&input, crate::testing::fixtures::djvu_bytes()).await.unwrap();
        let output = dir.path().join("scan.docx");
        let work = dir.path().join("work");

        let ddjvu = Arc::new(MockAdapter::new("ddjvu", &[("djvu", "pdf")]));
        let pdf2docx = Arc::new(MockAdapter::new("pdf2docx", &[("pdf", "docx")]));
        let strategy = ConversionStrategy::chain(
            f("djvu"),
            f("docx"),
            vec![
                Hop::new(ddjvu.clone() as Arc<dyn ToolAdapter>, f("djvu"), f("pdf")),
                Hop::new(pdf2docx.clone() as Arc<dyn ToolAdapter>, f("pdf"), f("docx")),
            ],
        );
        let runner = StrategyRunner::new(&work, Duration::from_secs(5));

        runner
            .run(&strategy, &input, &output, &ConversionOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let intermediate = ddjvu.recorded_invocations().await[0].output.clone();
        assert_eq!(pdf2docx.recorded_invocations().await[0].input, intermediate);
        assert!(!intermediate.exists());
        assert!(dir_entries(&work).await.is_empty());
        assert!(tokio::fs::read(&output).await.unwrap().starts_with(b"PK\x03\x04"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_tool_execution() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.pdf");
        tokio::fs::write(&input, b"%PDF-1.4").await.unwrap();
        let output = dir.path().join("a.txt");

        let adapter = Arc::new(MockAdapter::new("pdftotext", &[("pdf", "txt")]));
        adapter.set_always_fail(true).await;
        let strategy = ConversionStrategy::direct(adapter, f("pdf"), f("txt"));
        let runner = StrategyRunner::new(dir.path().join("work"), Duration::from_secs(5));

        let err = runner
            .run(&strategy, &input, &output, &ConversionOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecution);
        assert!(!output.exists());
        assert_eq!(dir_entries(dir.path()).await, vec!["a.pdf"]);
    }

    #[tokio::test]
    async fn test_empty_or_malformed_output_rejected() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.md");
        tokio::fs::write(&input, b"# a").await.unwrap();
        let runner = StrategyRunner::new(dir.path().join("work"), Duration::from_secs(5));

        let empty = Arc::new(MockAdapter::new("empty", &[("md", "txt")]));
        empty.set_output(MockOutput::Empty).await;
        let strategy = ConversionStrategy::direct(empty, f("md"), f("txt"));
        let err = runner
            .run(&strategy, &input, &dir.path().join("a.txt"), &ConversionOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutputValidation);

        let missing = Arc::new(MockAdapter::new("missing", &[("md", "html")]));
        missing.set_output(MockOutput::Missing).await;
        let strategy = ConversionStrategy::direct(missing, f("md"), f("html"));
        let err = runner
            .run(&strategy, &input, &dir.path().join("a.html"), &ConversionOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutputValidation);
    }

    #[tokio::test]
    async fn test_timeout_terminates_invocation() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.md");
        tokio::fs::write(&input, b"# a").await.unwrap();
        let output = dir.path().join("a.txt");

        let adapter = Arc::new(MockAdapter::new("slow", &[("md", "txt")]));
        adapter.set_delay(Duration::from_secs(30)).await;
        let strategy = ConversionStrategy::direct(adapter.clone(), f("md"), f("txt"));
        let runner = StrategyRunner::new(dir.path().join("work"), Duration::from_millis(100));

        let err = runner
            .run(&strategy, &input, &output, &ConversionOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(adapter.in_flight(), 0);
        // The partially written artifact is gone
        assert_eq!(dir_entries(dir.path()).await, vec!["a.md"]);
    }

    #[tokio::test]
    async fn test_identity_copies_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.pdf");
        tokio::fs::write(&input, b"%PDF-1.4 body").await.unwrap();
        let output = dir.path().join("copy").join("a.pdf");

        let runner = StrategyRunner::new(dir.path().join("work"), Duration::from_secs(5));
        runner
            .run(
                &ConversionStrategy::identity(f("pdf")),
                &input,
                &output,
                &ConversionOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = StrategyRunner::new(dir.path(), Duration::from_secs(5));
        let err = runner
            .run(
                &ConversionStrategy::identity(f("pdf")),
                Path::new("/nonexistent"),
                &dir.path().join("x.pdf"),
                &ConversionOptions::default(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
