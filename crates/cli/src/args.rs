//! Command-line arguments.

use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use metamorph_core::{Config, ConversionOptions, FormatId};

/// Convert documents between formats using the converter tools installed on
/// this machine.
#[derive(Debug, Parser)]
#[command(name = "metamorph", version, about)]
#[command(group(
    ArgGroup::new("maintenance")
        .args(["list_tools", "prune_cache", "clear_cache"])
        .multiple(true)
))]
pub struct Args {
    /// Target format (e.g. pdf, docx, txt)
    #[arg(required_unless_present = "maintenance")]
    pub target: Option<String>,

    /// Input files or directories
    #[arg(required_unless_present = "maintenance")]
    pub inputs: Vec<PathBuf>,

    /// Write outputs here instead of next to each input
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Quality hint for lossy targets (1-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Text encoding for text targets
    #[arg(long)]
    pub encoding: Option<String>,

    /// OCR language for scanned inputs (e.g. eng, deu)
    #[arg(long)]
    pub ocr_lang: Option<String>,

    /// Compression level (0-9)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
    pub compression: Option<u8>,

    /// Do not read or write the artifact cache
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum concurrent conversions
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Attempts per conversion, including the first
    #[arg(long)]
    pub retries: Option<u32>,

    /// Per-invocation timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Intermediate formats allowed when chaining (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub via: Vec<String>,

    /// Never chain tools
    #[arg(long)]
    pub no_chain: bool,

    /// Maximum tools in a chain
    #[arg(long)]
    pub max_hops: Option<usize>,

    /// Show what would be done without converting anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Descend into directories
    #[arg(short, long)]
    pub recursive: bool,

    /// Print accumulated statistics after the run
    #[arg(long)]
    pub stats: bool,

    /// Configuration file
    #[arg(short, long, env = "METAMORPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write Prometheus metrics to this file when done
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// List known tools and whether they are installed
    #[arg(long)]
    pub list_tools: bool,

    /// Remove expired cache entries
    #[arg(long)]
    pub prune_cache: bool,

    /// Remove every cache entry
    #[arg(long)]
    pub clear_cache: bool,
}

impl Args {
    /// Log filter implied by `-v`/`--quiet`, used when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if self.no_cache {
            config.cache.enabled = false;
        }
        if let Some(jobs) = self.jobs {
            config.scheduler.max_concurrency = jobs;
        }
        if let Some(retries) = self.retries {
            config.retry.max_attempts = retries;
        }
        if let Some(timeout) = self.timeout {
            config.scheduler.timeout_secs = timeout;
        }
        if !self.via.is_empty() {
            config.chain.hubs = self.via.iter().map(FormatId::new).collect();
        }
        if self.no_chain {
            config.chain.enabled = false;
        }
        if let Some(max_hops) = self.max_hops {
            config.chain.max_hops = max_hops;
        }
        if let Some(ref file) = self.metrics_file {
            config.metrics.file = Some(file.clone());
        }
    }

    pub fn options(&self) -> ConversionOptions {
        let mut options = ConversionOptions::default();
        if let Some(quality) = self.quality {
            options = options.with_quality(quality);
        }
        if let Some(ref encoding) = self.encoding {
            options = options.with_encoding(encoding);
        }
        if let Some(ref lang) = self.ocr_lang {
            options = options.with_ocr_language(lang);
        }
        if let Some(compression) = self.compression {
            options = options.with_compression(compression);
        }
        options
    }

    pub fn is_maintenance(&self) -> bool {
        self.list_tools || self.prune_cache || self.clear_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("metamorph").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_target_and_inputs() {
        let args = parse(&["pdf", "a.docx", "b.odt"]);
        assert_eq!(args.target.as_deref(), Some("pdf"));
        assert_eq!(args.inputs, vec![PathBuf::from("a.docx"), PathBuf::from("b.odt")]);
        assert!(!args.is_maintenance());
    }

    #[test]
    fn test_inputs_required_for_conversion() {
        assert!(Args::try_parse_from(["metamorph", "pdf"]).is_err());
    }

    #[test]
    fn test_maintenance_needs_no_inputs() {
        let args = parse(&["--list-tools"]);
        assert!(args.is_maintenance());
        assert!(args.target.is_none());
    }

    #[test]
    fn test_maintenance_flags_combine() {
        let args = parse(&["--clear-cache", "--prune-cache", "--list-tools"]);
        assert!(args.clear_cache && args.prune_cache && args.list_tools);
        assert!(args.is_maintenance());
    }

    #[test]
    fn test_overrides_applied() {
        let args = parse(&[
            "docx", "scan.djvu", "--jobs", "2", "--retries", "5", "--timeout", "30",
            "--via", "pdf,html", "--max-hops", "3", "--no-cache",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.scheduler.max_concurrency, 2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.scheduler.timeout_secs, 30);
        assert_eq!(config.chain.hubs, vec![FormatId::new("pdf"), FormatId::new("html")]);
        assert_eq!(config.chain.max_hops, 3);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_options_from_flags() {
        let args = parse(&["pdf", "a.png", "--quality", "80", "--ocr-lang", "deu"]);
        let options = args.options();
        assert_eq!(options.get("quality").as_deref(), Some("80"));
        assert_eq!(options.get("ocr_lang").as_deref(), Some("deu"));
        assert!(args.options() != ConversionOptions::default());
    }

    #[test]
    fn test_quality_out_of_range() {
        assert!(Args::try_parse_from(["metamorph", "pdf", "a.png", "--quality", "0"]).is_err());
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(parse(&["pdf", "a"]).log_filter(), "info");
        assert_eq!(parse(&["pdf", "a", "-vv"]).log_filter(), "trace");
        assert_eq!(parse(&["pdf", "a", "--quiet"]).log_filter(), "warn");
    }
}
