//! Built-in adapter catalog.

use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::command::{CommandAdapter, CommandSpec, OutputMode};
use super::traits::ToolAdapter;
use crate::config::AdaptersConfig;

const PANDOC_READS: &[&str] = &["markdown", "html", "docx", "odt", "epub", "tex", "rst", "org"];
const PANDOC_WRITES: &[&str] = &[
    "markdown", "html", "docx", "odt", "epub", "tex", "rst", "org", "txt", "rtf",
];

const OFFICE_TEXT: &[&str] = &["doc", "docx", "odt", "rtf", "txt", "html"];
const OFFICE_TEXT_OUT: &[&str] = &["pdf", "docx", "odt", "doc", "rtf", "txt", "html"];
const OFFICE_SHEETS: &[&str] = &["xls", "xlsx", "ods", "csv"];
const OFFICE_SHEETS_OUT: &[&str] = &["pdf", "xlsx", "ods", "csv"];
const OFFICE_SLIDES: &[&str] = &["ppt", "pptx", "odp"];
const OFFICE_SLIDES_OUT: &[&str] = &["pdf", "pptx", "odp"];

const EBOOK_READS: &[&str] = &[
    "epub", "mobi", "azw3", "fb2", "html", "docx", "txt", "pdf", "rtf", "odt",
];
const EBOOK_WRITES: &[&str] = &["epub", "mobi", "azw3", "fb2", "pdf", "docx", "txt", "html", "rtf"];

const RASTER: &[&str] = &["png", "jpg", "gif", "bmp", "tiff", "webp"];

/// Specs for every converter the engine knows out of the box.
pub fn builtin_specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("pandoc", "pandoc")
            .with_args(&["{input}", "-f", "{from}", "-t", "{to}", "-o", "{output}"])
            .with_pairs_between(PANDOC_READS, PANDOC_WRITES)
            .with_format_name("txt", "plain")
            .with_format_name("tex", "latex")
            .with_score(80)
            .critical(),
        CommandSpec::new("libreoffice", "soffice")
            .with_args(&[
                "--headless",
                "--convert-to",
                "{to}",
                "--outdir",
                "{output_dir}",
                "{input}",
            ])
            .with_pairs_between(OFFICE_TEXT, OFFICE_TEXT_OUT)
            .with_pairs_between(OFFICE_SHEETS, OFFICE_SHEETS_OUT)
            .with_pairs_between(OFFICE_SLIDES, OFFICE_SLIDES_OUT)
            .with_output(OutputMode::Directory)
            .with_score(70)
            .critical(),
        CommandSpec::new("calibre", "ebook-convert")
            .with_args(&["{input}", "{output}"])
            .with_pairs_between(EBOOK_READS, EBOOK_WRITES)
            .with_score(75),
        CommandSpec::new("pdftotext", "pdftotext")
            .with_args(&["-enc", "{encoding:UTF-8}", "-layout", "{input}", "{output}"])
            .with_pair("pdf", "txt")
            .with_probe_args(&["-v"])
            .with_score(90),
        CommandSpec::new("pdf2docx", "pdf2docx")
            .with_args(&["convert", "{input}", "{output}"])
            .with_pair("pdf", "docx")
            .with_probe_args(&["--help"])
            .with_score(60),
        CommandSpec::new("ddjvu", "ddjvu")
            .with_args(&["-format={to}", "-quality={quality}", "{input}", "{output}"])
            .with_pairs_between(&["djvu"], &["pdf", "tiff"])
            .with_probe_args(&["--help"])
            .with_score(80),
        CommandSpec::new("tesseract", "tesseract")
            .with_args(&["{input}", "{output_stem}", "-l", "{ocr_lang:eng}", "{to}"])
            .with_pairs_between(RASTER, &["txt", "pdf"])
            .with_score(60),
        CommandSpec::new("imagemagick", "magick")
            .with_args(&["{input}", "?-quality", "{quality}", "{output}"])
            .with_pairs_between(RASTER, RASTER)
            .with_pairs_between(RASTER, &["pdf"])
            .with_probe_args(&["-version"])
            .with_score(50),
        CommandSpec::new("rsvg", "rsvg-convert")
            .with_args(&["--format={to}", "--output={output}", "{input}"])
            .with_pairs_between(&["svg"], &["png", "pdf", "ps"])
            .with_score(70),
    ]
}

/// Builds the adapter list: built-ins minus disabled ones, score overrides
/// applied, then configured extras in declaration order.
pub fn build_catalog(config: &AdaptersConfig, grace_period: Duration) -> Vec<Arc<dyn ToolAdapter>> {
    let mut adapters: Vec<Arc<dyn ToolAdapter>> = Vec::new();

    for mut spec in builtin_specs().into_iter().chain(config.extra.iter().cloned()) {
        if config.disabled.iter().any(|name| name == &spec.name) {
            debug!("Adapter {} disabled by configuration", spec.name);
            continue;
        }
        if let Some(score) = config.overrides.get(&spec.name) {
            spec.score = *score;
        }
        match CommandAdapter::new(spec) {
            Ok(adapter) => adapters.push(Arc::new(adapter.with_grace_period(grace_period))),
            Err(e) => warn!("Skipping adapter with invalid spec: {}", e),
        }
    }

    adapters
}
