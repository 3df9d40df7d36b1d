//! Generic adapter that runs an external program from a declarative spec.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::AdapterError;
use super::traits::ToolAdapter;
use super::types::{ExitStatus, Invocation};
use crate::format::{FormatId, FormatPair};

/// Bytes of stderr kept for error reports.
const STDERR_TAIL: usize = 4096;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the tool puts its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// The tool writes the path given as `{output}`.
    #[default]
    File,
    /// The tool writes the result to stdout.
    Stdout,
    /// The tool picks its own file name inside `{output_dir}`.
    Directory,
}

/// Declarative description of a command-line converter.
///
/// Argument templates may contain `{placeholder}` or `{placeholder:default}`.
/// Known placeholders are `input`, `output`, `output_dir`, `output_stem`,
/// `input_stem`, `from`, `to` and any conversion option (`quality`,
/// `encoding`, `ocr_lang`, `compression`, or an `extra` key). An argument
/// whose placeholder has no value is dropped, and so is the flag before it
/// when that flag is written with a leading `?` (e.g. `"?-quality"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub pairs: Vec<(FormatId, FormatId)>,
    #[serde(default = "default_score")]
    pub score: i32,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub output: OutputMode,
    /// Tool-specific names substituted for `{from}` and `{to}`.
    #[serde(default)]
    pub format_names: BTreeMap<String, String>,
    #[serde(default = "default_probe_args")]
    pub probe_args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_score() -> i32 {
    50
}

fn default_probe_args() -> Vec<String> {
    vec!["--version".to_string()]
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            pairs: Vec::new(),
            score: default_score(),
            critical: false,
            output: OutputMode::File,
            format_names: BTreeMap::new(),
            probe_args: default_probe_args(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_pair(mut self, from: impl Into<FormatId>, to: impl Into<FormatId>) -> Self {
        self.pairs.push((from.into(), to.into()));
        self
    }

    /// Adds every combination of `sources` and `targets`, skipping identities.
    pub fn with_pairs_between(mut self, sources: &[&str], targets: &[&str]) -> Self {
        for from in sources {
            for to in targets {
                let (from, to) = (FormatId::new(from), FormatId::new(to));
                if from != to && !self.pairs.contains(&(from.clone(), to.clone())) {
                    self.pairs.push((from, to));
                }
            }
        }
        self
    }

    pub fn with_score(mut self, score: i32) -> Self {
        self.score = score;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_output(mut self, mode: OutputMode) -> Self {
        self.output = mode;
        self
    }

    pub fn with_format_name(mut self, format: &str, name: &str) -> Self {
        self.format_names
            .insert(FormatId::new(format).to_string(), name.to_string());
        self
    }

    pub fn with_probe_args(mut self, args: &[&str]) -> Self {
        self.probe_args = args.iter().map(|a| a.to_string()).collect();
        self
    }
}

/// [`ToolAdapter`] that spawns the program described by a [`CommandSpec`].
pub struct CommandAdapter {
    spec: CommandSpec,
    pairs: Vec<FormatPair>,
    grace_period: Duration,
}

impl CommandAdapter {
    /// Creates an adapter, rejecting malformed argument templates.
    pub fn new(spec: CommandSpec) -> Result<Self, AdapterError> {
        for arg in &spec.args {
            render_template(arg.trim_start_matches('?'), &|_| Some(String::new()))?;
        }
        let pairs = spec
            .pairs
            .iter()
            .map(|(from, to)| FormatPair::new(from.clone(), to.clone()))
            .collect();
        Ok(Self {
            spec,
            pairs,
            grace_period: Duration::from_secs(5),
        })
    }

    /// Time between SIGTERM and SIGKILL when an invocation is cancelled.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_score(mut self, score: i32) -> Self {
        self.spec.score = score;
        self
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn format_name(&self, format: &FormatId) -> String {
        self.spec
            .format_names
            .get(format.as_str())
            .cloned()
            .unwrap_or_else(|| format.to_string())
    }

    /// Expands the argument templates for one invocation.
    fn render_args(
        &self,
        invocation: &Invocation,
        tool_output: &Path,
        output_dir: &Path,
    ) -> Result<Vec<String>, AdapterError> {
        let lookup = |name: &str| -> Option<String> {
            match name {
                "input" => Some(invocation.input.to_string_lossy().into_owned()),
                "output" => Some(tool_output.to_string_lossy().into_owned()),
                "output_dir" => Some(output_dir.to_string_lossy().into_owned()),
                "output_stem" => Some(tool_output.with_extension("").to_string_lossy().into_owned()),
                "input_stem" => invocation
                    .input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned()),
                "from" => Some(self.format_name(&invocation.from)),
                "to" => Some(self.format_name(&invocation.to)),
                other => invocation.options.get(other),
            }
        };

        let mut args = Vec::with_capacity(self.spec.args.len());
        let mut pending_flag: Option<&str> = None;
        for template in &self.spec.args {
            if let Some(flag) = template.strip_prefix('?') {
                if let Some(previous) = pending_flag.replace(flag) {
                    args.push(previous.to_string());
                }
                continue;
            }
            match render_template(template, &lookup)? {
                Some(value) => {
                    if let Some(flag) = pending_flag.take() {
                        args.push(flag.to_string());
                    }
                    args.push(value);
                }
                None => pending_flag = None,
            }
        }
        Ok(args)
    }
}

#[async_trait]
impl ToolAdapter for CommandAdapter {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn supported_pairs(&self) -> &[FormatPair] {
        &self.pairs
    }

    fn capability_score(&self) -> i32 {
        self.spec.score
    }

    fn is_critical(&self) -> bool {
        self.spec.critical
    }

    async fn probe(&self) -> bool {
        let result = timeout(
            PROBE_TIMEOUT,
            Command::new(&self.spec.program)
                .args(&self.spec.probe_args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await;
        // Some tools exit nonzero for their version flag; starting is enough.
        matches!(result, Ok(Ok(_)))
    }

    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus, AdapterError> {
        let out_parent = invocation
            .output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let scratch = match self.spec.output {
            OutputMode::Directory => Some(
                tempfile::Builder::new()
                    .prefix(".metamorph-")
                    .tempdir_in(&out_parent)?,
            ),
            _ => None,
        };
        let (tool_output, output_dir) = match scratch {
            Some(ref dir) => {
                let stem = invocation
                    .input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "output".to_string());
                let name = format!("{}.{}", stem, invocation.to.extension());
                (dir.path().join(name), dir.path().to_path_buf())
            }
            None => (invocation.output.clone(), out_parent),
        };

        let args = self.render_args(invocation, &tool_output, &output_dir)?;
        let stdout = match self.spec.output {
            OutputMode::Stdout => {
                let file = tokio::fs::File::create(&invocation.output).await?;
                Stdio::from(file.into_std().await)
            }
            _ => Stdio::null(),
        };

        debug!(
            adapter = %self.spec.name,
            "Running {} {}",
            self.spec.program.display(),
            args.join(" ")
        );

        let mut child = Command::new(&self.spec.program)
            .args(&args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AdapterError::ProgramNotFound {
                        program: self.spec.program.clone(),
                    }
                } else {
                    AdapterError::Spawn {
                        program: self.spec.program.clone(),
                        source: e,
                    }
                }
            })?;

        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_tail(s)));

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        let status = match waited {
            Some(status) => status?,
            None => {
                terminate(&mut child, self.grace_period).await;
                return Err(AdapterError::Cancelled);
            }
        };

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let exit = ExitStatus {
            code: status.code(),
            stderr,
        };

        if exit.is_success() {
            if let Some(ref dir) = scratch {
                collect_directory_output(dir.path(), &tool_output, &invocation.output).await?;
            }
        }

        Ok(exit)
    }
}

/// Expands one template. Returns `Ok(None)` when a placeholder has no value
/// and no default.
fn render_template(
    template: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Option<String>, AdapterError> {
    let invalid = |reason: &str| AdapterError::InvalidTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
            continue;
        }
        if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
            continue;
        }
        if tail.starts_with('}') {
            return Err(invalid("unmatched '}'"));
        }

        let end = tail.find('}').ok_or_else(|| invalid("unclosed placeholder"))?;
        let inner = &tail[1..end];
        let (name, default) = match inner.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (inner, None),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("placeholder names are alphanumeric"));
        }

        match lookup(name)
            .filter(|v| !v.is_empty())
            .or_else(|| default.map(str::to_string))
        {
            Some(value) => out.push_str(&value),
            None => return Ok(None),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(Some(out))
}

async fn read_tail(mut stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > STDERR_TAIL * 2 {
                    buf.drain(..buf.len() - STDERR_TAIL);
                }
            }
        }
    }
    if buf.len() > STDERR_TAIL {
        buf.drain(..buf.len() - STDERR_TAIL);
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    match child.id() {
        Some(pid) => {
            // SAFETY: the pid belongs to our child, which has not been reaped.
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
        }
        None => false,
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

/// SIGTERM, then SIGKILL once the grace period runs out.
async fn terminate(child: &mut Child, grace_period: Duration) {
    if send_sigterm(child) && timeout(grace_period, child.wait()).await.is_ok() {
        return;
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill converter process: {}", e);
    }
}

async fn collect_directory_output(
    scratch: &Path,
    expected: &Path,
    destination: &Path,
) -> Result<(), AdapterError> {
    let produced = if tokio::fs::try_exists(expected).await.unwrap_or(false) {
        expected.to_path_buf()
    } else {
        // Accept a single file under a name the tool chose itself.
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(scratch).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        if files.len() != 1 {
            return Err(AdapterError::OutputMissing {
                path: expected.to_path_buf(),
            });
        }
        files.remove(0)
    };
    tokio::fs::rename(&produced, destination).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ConversionOptions;
    use tempfile::TempDir;

    fn invocation(input: &Path, output: &Path, options: ConversionOptions) -> Invocation {
        Invocation {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            from: FormatId::new("md"),
            to: FormatId::new("txt"),
            options,
        }
    }

    fn render(spec: CommandSpec, options: ConversionOptions) -> Vec<String> {
        let adapter = CommandAdapter::new(spec).unwrap();
        let inv = invocation(Path::new("/in/doc.md"), Path::new("/out/doc.txt"), options);
        adapter
            .render_args(&inv, Path::new("/out/doc.txt"), Path::new("/out"))
            .unwrap()
    }

    #[test]
    fn test_render_placeholders_and_format_names() {
        let spec = CommandSpec::new("pandoc", "pandoc")
            .with_args(&["{input}", "-f", "{from}", "-t", "{to}", "-o", "{output}"])
            .with_format_name("txt", "plain");
        assert_eq!(
            render(spec, ConversionOptions::default()),
            vec!["/in/doc.md", "-f", "markdown", "-t", "plain", "-o", "/out/doc.txt"]
        );
    }

    #[test]
    fn test_render_optional_flag_dropped_without_value() {
        let spec = CommandSpec::new("magick", "magick")
            .with_args(&["{input}", "?-quality", "{quality}", "{output}"]);
        assert_eq!(
            render(spec.clone(), ConversionOptions::default()),
            vec!["/in/doc.md", "/out/doc.txt"]
        );
        assert_eq!(
            render(spec, ConversionOptions::default().with_quality(75)),
            vec!["/in/doc.md", "-quality", "75", "/out/doc.txt"]
        );
    }

    #[test]
    fn test_render_defaults_and_stems() {
        let spec = CommandSpec::new("tesseract", "tesseract")
            .with_args(&["{input}", "{output_stem}", "-l", "{ocr_lang:eng}", "-enc={encoding}"]);
        assert_eq!(
            render(spec.clone(), ConversionOptions::default()),
            vec!["/in/doc.md", "/out/doc", "-l", "eng"]
        );
        assert_eq!(
            render(spec, ConversionOptions::default().with_ocr_language("deu")),
            vec!["/in/doc.md", "/out/doc", "-l", "deu"]
        );
    }

    #[test]
    fn test_render_escaped_braces() {
        assert_eq!(
            render_template("{{literal}}", &|_| None).unwrap().as_deref(),
            Some("{literal}")
        );
    }

    #[test]
    fn test_malformed_template_rejected() {
        let spec = CommandSpec::new("bad", "bad").with_args(&["{input"]);
        assert!(matches!(
            CommandAdapter::new(spec),
            Err(AdapterError::InvalidTemplate { .. })
        ));
        let spec = CommandSpec::new("bad", "bad").with_args(&["{in put}"]);
        assert!(CommandAdapter::new(spec).is_err());
    }

    #[test]
    fn test_pairs_between_skips_identity() {
        let spec = CommandSpec::new("x", "x").with_pairs_between(&["md", "html"], &["html", "txt"]);
        assert_eq!(spec.pairs.len(), 3);
        assert!(!spec
            .pairs
            .contains(&(FormatId::new("html"), FormatId::new("html"))));
    }

    #[tokio::test]
    async fn test_probe_missing_program() {
        let adapter =
            CommandAdapter::new(CommandSpec::new("ghost", "/nonexistent/metamorph-tool")).unwrap();
        assert!(!adapter.probe().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_file_mode() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("doc.md");
        let output = dir.path().join("doc.txt");
        tokio::fs::write(&input, b"hello").await.unwrap();

        let spec = CommandSpec::new("copy", "sh")
            .with_args(&["-c", "cat \"$0\" > \"$1\"", "{input}", "{output}"])
            .with_pair("md", "txt");
        let adapter = CommandAdapter::new(spec).unwrap();
        let status = adapter
            .invoke(
                &invocation(&input, &output, ConversionOptions::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(status.is_success());
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_stdout_mode() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("doc.md");
        let output = dir.path().join("doc.txt");
        tokio::fs::write(&input, b"from stdout").await.unwrap();

        let spec = CommandSpec::new("cat", "cat")
            .with_args(&["{input}"])
            .with_output(OutputMode::Stdout);
        let adapter = CommandAdapter::new(spec).unwrap();
        adapter
            .invoke(
                &invocation(&input, &output, ConversionOptions::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"from stdout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_directory_mode() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("report.md");
        let output = dir.path().join(".report.partial.txt");
        tokio::fs::write(&input, b"dir mode").await.unwrap();

        let spec = CommandSpec::new("office", "sh")
            .with_args(&["-c", "cp \"$0\" \"$1/$2.txt\"", "{input}", "{output_dir}", "{input_stem}"])
            .with_output(OutputMode::Directory);
        let adapter = CommandAdapter::new(spec).unwrap();
        adapter
            .invoke(
                &invocation(&input, &output, ConversionOptions::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"dir mode");
        // Scratch directory is gone
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert!(!names.iter().any(|n| n.starts_with(".metamorph-")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_failure_captures_stderr() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("doc.md");
        tokio::fs::write(&input, b"x").await.unwrap();

        let spec = CommandSpec::new("failing", "sh").with_args(&["-c", "echo broken >&2; exit 3"]);
        let adapter = CommandAdapter::new(spec).unwrap();
        let status = adapter
            .invoke(
                &invocation(&input, &dir.path().join("doc.txt"), ConversionOptions::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(status.code, Some(3));
        assert_eq!(status.stderr, "broken");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_cancellation_terminates_process() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("doc.md");
        tokio::fs::write(&input, b"x").await.unwrap();

        let spec = CommandSpec::new("slow", "sleep").with_args(&["30"]);
        let adapter = CommandAdapter::new(spec)
            .unwrap()
            .with_grace_period(Duration::from_millis(200));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = adapter
            .invoke(
                &invocation(&input, &dir.path().join("doc.txt"), ConversionOptions::default()),
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(AdapterError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
