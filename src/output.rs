//! Result types returned by the extraction entry points.

use crate::error::Diagnostic;
use crate::invoice::DeduplicatedInvoice;
use serde::{Deserialize, Serialize};

/// The complete result of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consolidation {
    /// Deduplicated invoices in first-seen order.
    pub invoices: Vec<DeduplicatedInvoice>,
    /// Markdown report.
    pub report: String,
    /// Pretty-printed JSON array of `invoices`.
    pub payload: String,
    /// Non-fatal events, page-scoped ones first in page order.
    pub diagnostics: Vec<Diagnostic>,
    pub stats: ExtractionStats,
}

impl Consolidation {
    /// Diagnostics that mark lost or degraded data.
    pub fn degradations(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_degradation())
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the source document.
    pub total_pages: usize,
    /// Pages chosen by the page selection.
    pub selected_pages: usize,
    /// Pages that could not be rendered and were never classified.
    pub skipped_pages: usize,
    /// Pages that reached the classifier.
    pub classified_pages: usize,
    pub invoice_pages: usize,
    pub non_invoice_pages: usize,
    /// Classified pages downgraded to non-invoice (bad reply, timeout).
    pub malformed_pages: usize,
    /// Invoices after merging, before dedup.
    pub merged_invoices: usize,
    pub duplicates_removed: usize,
    /// Invoices in the final result.
    pub invoices: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub classify_duration_ms: u64,
    pub consolidate_duration_ms: u64,
    pub total_duration_ms: u64,
}
