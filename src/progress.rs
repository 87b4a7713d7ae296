//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to be told
//! as each page is classified. The CLI uses it to drive a progress bar; a
//! server could forward the events over a channel instead.
//!
//! # Example
//!
//! ```rust
//! use edgequake_invoices::{ExtractionConfig, ExtractionProgressCallback, PageKind};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct InvoicePageCounter(AtomicUsize);
//!
//! impl ExtractionProgressCallback for InvoicePageCounter {
//!     fn on_page_classified(&self, _page: usize, _total: usize, kind: PageKind) {
//!         if kind == PageKind::Invoice {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(InvoicePageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use crate::invoice::PageKind;
use std::sync::Arc;

/// Called by the orchestrator while it classifies pages.
///
/// With `concurrency > 1` the page-level methods may be called concurrently
/// and out of page order. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the document is open and its pages are rendered.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is sent to the classifier.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when the classifier's reply for a page was usable.
    fn on_page_classified(&self, page_num: usize, total_pages: usize, kind: PageKind) {
        let _ = (page_num, total_pages, kind);
    }

    /// Called when a page is left out: it failed to render, or the
    /// classifier's reply was unusable or never came.
    fn on_page_skipped(&self, page_num: usize, total_pages: usize, reason: &str) {
        let _ = (page_num, total_pages, reason);
    }

    /// Called as the orchestrator enters ingest, merge, dedup and format.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once after merge and dedup, with the number of invoices found.
    fn on_extraction_complete(&self, total_pages: usize, invoice_count: usize) {
        let _ = (total_pages, invoice_count);
    }
}

/// Does nothing. Handy as an explicit placeholder.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tally {
        invoices: AtomicUsize,
        others: AtomicUsize,
        skipped: AtomicUsize,
        found: AtomicUsize,
    }

    impl ExtractionProgressCallback for Tally {
        fn on_page_classified(&self, _page: usize, _total: usize, kind: PageKind) {
            match kind {
                PageKind::Invoice => self.invoices.fetch_add(1, Ordering::SeqCst),
                PageKind::NonInvoice => self.others.fetch_add(1, Ordering::SeqCst),
            };
        }

        fn on_page_skipped(&self, _page: usize, _total: usize, _reason: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_extraction_complete(&self, _total: usize, invoice_count: usize) {
            self.found.store(invoice_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(3);
        cb.on_page_start(1, 3);
        cb.on_page_classified(1, 3, PageKind::Invoice);
        cb.on_page_skipped(2, 3, "render failed");
        cb.on_stage(Stage::Merge);
        cb.on_extraction_complete(3, 1);
    }

    #[test]
    fn tally_counts_events_through_arc_dyn() {
        let tally = Arc::new(Tally::default());
        let cb: ProgressCallback = tally.clone();

        cb.on_page_classified(1, 3, PageKind::Invoice);
        cb.on_page_classified(2, 3, PageKind::NonInvoice);
        cb.on_page_skipped(3, 3, "timeout");
        cb.on_extraction_complete(3, 1);

        assert_eq!(tally.invoices.load(Ordering::SeqCst), 1);
        assert_eq!(tally.others.load(Ordering::SeqCst), 1);
        assert_eq!(tally.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(tally.found.load(Ordering::SeqCst), 1);
    }
}
