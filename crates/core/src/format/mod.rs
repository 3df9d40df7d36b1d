//! Format identification.
//!
//! `FormatDetector` classifies an input file using, in strict priority order:
//!
//! 1. content signatures (magic bytes, ZIP container refinement)
//! 2. a MIME-type probe (the `file` utility by default)
//! 3. textual heuristics (markup, JSON, LaTeX, Markdown, CSV)
//! 4. the filename extension
//!
//! The first method that answers wins. Detection only depends on the file's
//! bytes and name.

mod detector;
mod heuristics;
mod signatures;
mod types;

pub use detector::{Detection, DetectionMethod, FileCommandProbe, FormatDetector, MimeProbe};
pub use signatures::{artifact_looks_valid, format_for_extension, HEADER_LEN};
pub use types::{FormatId, FormatPair};
