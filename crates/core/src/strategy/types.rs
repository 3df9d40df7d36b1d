//! Strategy types.

use std::fmt;
use std::sync::Arc;

use crate::adapter::ToolAdapter;
use crate::format::FormatId;

/// One adapter invocation within a strategy.
#[derive(Clone)]
pub struct Hop {
    pub adapter: Arc<dyn ToolAdapter>,
    pub from: FormatId,
    pub to: FormatId,
}

impl Hop {
    pub fn new(adapter: Arc<dyn ToolAdapter>, from: FormatId, to: FormatId) -> Self {
        Self { adapter, from, to }
    }
}

impl fmt::Debug for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.adapter.name(), self.from, self.to)
    }
}

/// Ordered adapter invocations turning `source` into `target`.
///
/// No hops means an identity copy, one hop a direct conversion, and more
/// than one a chain through intermediate formats.
#[derive(Debug, Clone)]
pub struct ConversionStrategy {
    pub source: FormatId,
    pub target: FormatId,
    pub hops: Vec<Hop>,
}

impl ConversionStrategy {
    pub fn identity(format: FormatId) -> Self {
        Self {
            source: format.clone(),
            target: format,
            hops: Vec::new(),
        }
    }

    pub fn direct(adapter: Arc<dyn ToolAdapter>, source: FormatId, target: FormatId) -> Self {
        Self {
            hops: vec![Hop::new(adapter, source.clone(), target.clone())],
            source,
            target,
        }
    }

    pub fn chain(source: FormatId, target: FormatId, hops: Vec<Hop>) -> Self {
        Self {
            source,
            target,
            hops,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn is_chain(&self) -> bool {
        self.hops.len() > 1
    }

    pub fn total_score(&self) -> i64 {
        self.hops
            .iter()
            .map(|h| h.adapter.capability_score() as i64)
            .sum()
    }

    /// Formats materialized between hops.
    pub fn intermediates(&self) -> Vec<&FormatId> {
        self.hops
            .iter()
            .take(self.hops.len().saturating_sub(1))
            .map(|h| &h.to)
            .collect()
    }

    /// Human-readable form, e.g. `ddjvu:djvu->pdf, pdf2docx:pdf->docx`.
    pub fn describe(&self) -> String {
        if self.is_identity() {
            return "identity".to_string();
        }
        self.hops
            .iter()
            .map(|h| format!("{:?}", h))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
