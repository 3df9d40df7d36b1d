//! Processor module for single conversion jobs.
//!
//! This module provides the `ConversionProcessor` which takes one
//! `ConversionRequest` through validation, locking, detection, strategy
//! resolution, caching and retried execution, and reports a
//! `ConversionResult`.
//!
//! # Example
//!
//! ```ignore
//! use metamorph_core::processor::{ConversionProcessor, ConversionRequest};
//!
//! let processor = ConversionProcessor::new(&config, registry, detector)
//!     .with_stats(stats)
//!     .with_events(events);
//!
//! let request = ConversionRequest::new("notes.md", "pdf");
//! let result = processor.process("job-1", &request, &cancel).await;
//! println!("{:?}: {:?}", result.status, result.strategy);
//! ```

mod conversion;
mod types;

pub use conversion::ConversionProcessor;
pub use types::{ConversionRequest, ConversionResult, ConversionStatus};
