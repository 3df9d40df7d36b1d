//! Human-readable run summary.

use std::fmt::Write;
use std::sync::Arc;

use metamorph_core::{ConversionResult, ConversionStatus, StatsRecord, ToolAdapter};

/// Totals for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub planned: usize,
    pub cache_hits: usize,
}

impl RunSummary {
    pub fn from_results(results: &[ConversionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                ConversionStatus::Success => summary.succeeded += 1,
                ConversionStatus::Failure => summary.failed += 1,
                ConversionStatus::Planned => summary.planned += 1,
            }
            if result.cache_hit {
                summary.cache_hits += 1;
            }
        }
        summary
    }

    /// Process exit status: 1 if anything failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// One line per file followed by the totals.
pub fn render_results(results: &[ConversionResult]) -> String {
    let mut out = String::new();
    for result in results {
        let line = match result.status {
            ConversionStatus::Success => format!(
                "ok      {} -> {} ({:.2}s{}{})",
                result.input_path.display(),
                result.output_path.display(),
                result.duration_secs,
                if result.cache_hit { ", cached" } else { "" },
                if result.attempts > 1 {
                    format!(", {} attempts", result.attempts)
                } else {
                    String::new()
                },
            ),
            ConversionStatus::Planned => format!(
                "plan    {} -> {} via {}",
                result.input_path.display(),
                result.output_path.display(),
                result.strategy.as_deref().unwrap_or("?"),
            ),
            ConversionStatus::Failure => format!(
                "FAILED  {} [{}] {}",
                result.input_path.display(),
                result
                    .error_kind
                    .map(|k| k.as_str())
                    .unwrap_or("unknown"),
                result.error.as_deref().unwrap_or(""),
            ),
        };
        let _ = writeln!(out, "{}", line);
    }

    let summary = RunSummary::from_results(results);
    let _ = write!(
        out,
        "\n{} succeeded, {} failed",
        summary.succeeded, summary.failed
    );
    if summary.planned > 0 {
        let _ = write!(out, ", {} planned", summary.planned);
    }
    if summary.cache_hits > 0 {
        let _ = write!(out, " ({} from cache)", summary.cache_hits);
    }
    out.push('\n');
    out
}

/// Lifetime totals and the per-pair table.
pub fn render_stats(stats: &StatsRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Conversions: {}", stats.conversions);
    let _ = writeln!(out, "Failures:    {}", stats.failures);
    let _ = writeln!(out, "Cache hits:  {}", stats.cache_hits);
    let _ = writeln!(out, "Success:     {:.1}%", stats.success_rate() * 100.0);
    let _ = writeln!(out, "Input bytes: {}", stats.total_size);
    let _ = writeln!(out, "Time spent:  {:.1}s", stats.total_time);

    if !stats.format_stats.is_empty() {
        let _ = writeln!(out, "\n{:<28} {:>8} {:>8}", "pair", "ok", "failed");
        for (pair, counts) in &stats.format_stats {
            let _ = writeln!(out, "{:<28} {:>8} {:>8}", pair, counts.success, counts.failure);
        }
    }
    out
}

/// The `--list-tools` table.
pub fn render_tools(adapters: &[(Arc<dyn ToolAdapter>, bool)]) -> String {
    let mut out = String::new();
    for (adapter, available) in adapters {
        let pairs = adapter
            .supported_pairs()
            .iter()
            .map(|p| format!("{}->{}", p.from, p.to))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            out,
            "{:<16} {:<9} score {:>3}{}  {}",
            adapter.name(),
            if *available { "installed" } else { "missing" },
            adapter.capability_score(),
            if adapter.is_critical() { " critical" } else { "" },
            pairs
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use metamorph_core::error::ConversionError;
    use metamorph_core::testing::MockAdapter;
    use metamorph_core::ConversionRequest;

    fn success(name: &str, cache_hit: bool) -> ConversionResult {
        let request = ConversionRequest::new(format!("/in/{}.md", name), "txt");
        let mut result = ConversionResult::new("job", &request);
        result.status = ConversionStatus::Success;
        result.attempts = 1;
        result.cache_hit = cache_hit;
        result
    }

    fn failure(name: &str) -> ConversionResult {
        let request = ConversionRequest::new(format!("/in/{}.svg", name), "docx");
        ConversionResult::failed(
            "job",
            &request,
            &ConversionError::validation(&request.input_path, "file does not exist"),
        )
    }

    #[test]
    fn test_summary_and_exit_code() {
        let results = vec![success("a", false), success("b", true), failure("c")];
        let summary = RunSummary::from_results(&results);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(RunSummary::from_results(&results[..2]).exit_code(), 0);
    }

    #[test]
    fn test_render_results() {
        let text = render_results(&[success("a", true), failure("c")]);
        assert!(text.contains("ok      /in/a.md -> /in/a.txt"));
        assert!(text.contains("cached"));
        assert!(text.contains("FAILED  /in/c.svg [validation]"));
        assert!(text.contains("1 succeeded, 1 failed (1 from cache)"));
    }

    #[test]
    fn test_render_stats_table() {
        let mut stats = StatsRecord::default();
        stats.record(&{
            let mut r = success("a", false);
            r.source_format = Some("markdown".into());
            r
        });
        let text = render_stats(&stats);
        assert!(text.contains("Conversions: 1"));
        assert!(text.contains("markdown_to_txt"));
    }

    #[test]
    fn test_render_tools() {
        let pandoc: Arc<dyn ToolAdapter> =
            Arc::new(MockAdapter::new("pandoc", &[("markdown", "html")]).critical());
        let text = render_tools(&[(pandoc, true)]);
        assert!(text.contains("pandoc"));
        assert!(text.contains("installed"));
        assert!(text.contains("critical"));
        assert!(text.contains("markdown->html"));
    }
}
