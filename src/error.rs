//! Error types for the edgequake-invoices library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`InvoiceError`] is **fatal**: the extraction cannot produce a result at
//!   all (the PDF cannot be opened, the classification service is down, the
//!   configuration is invalid). Returned as `Err(InvoiceError)` from the
//!   top-level `extract*` functions and from [`crate::consolidate`].
//!
//! * [`Diagnostic`] is **non-fatal**: something was skipped, downgraded or
//!   resolved heuristically (a page failed to render, the classifier returned
//!   garbage, an amount could not be formatted, two pages were merged).
//!   Diagnostics are collected alongside a successful
//!   [`crate::output::Consolidation`], never raised.
//!
//! A caller therefore always gets either a complete result (possibly with
//! fewer invoices than pages, plus diagnostics) or exactly one fatal error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage in which a fatal error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Before any stage ran: input resolution, provider set-up, opening the PDF.
    Setup,
    /// Page rendering and classification.
    Ingest,
    /// Multi-page grouping.
    Merge,
    /// Duplicate removal.
    Dedup,
    /// Report and payload rendering.
    Format,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Ingest => "ingest",
            Stage::Merge => "merge",
            Stage::Dedup => "dedup",
            Stage::Format => "format",
        };
        f.write_str(name)
    }
}

/// All fatal errors returned by the edgequake-invoices library.
///
/// Page-level problems are reported as [`Diagnostic`]s instead.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Source unavailable ────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The file is larger than `max_pdf_size_mb`.
    #[error("PDF '{path}' is {size_mb} MB, above the {limit_mb} MB limit")]
    FileTooLarge {
        path: PathBuf,
        size_mb: u64,
        limit_mb: u64,
    },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("No selected page is within the document (it has {total} pages)")]
    NoPagesSelected { total: usize },

    // ── Classification service ────────────────────────────────────────────
    /// The vision provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The classification service could not be reached at all.
    ///
    /// Raised on the first page that hits it; remaining pages are not tried.
    #[error(
        "Classification service unavailable (page {page}): {detail}\n\
Make sure the model server is running (e.g. `ollama serve`)."
    )]
    ClassificationServiceUnavailable { page: usize, detail: String },

    // ── Output ────────────────────────────────────────────────────────────
    /// The JSON payload could not be encoded.
    #[error("Failed to encode invoice payload: {0}")]
    PayloadEncoding(#[source] serde_json::Error),

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config ────────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InvoiceError {
    /// The stage that was running when the error surfaced.
    pub fn stage(&self) -> Stage {
        match self {
            InvoiceError::ClassificationServiceUnavailable { .. } => Stage::Ingest,
            InvoiceError::PayloadEncoding(_) | InvoiceError::OutputWriteFailed { .. } => {
                Stage::Format
            }
            _ => Stage::Setup,
        }
    }

    /// Whether this error means the source document could not be opened.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(
            self,
            InvoiceError::FileNotFound { .. }
                | InvoiceError::PermissionDenied { .. }
                | InvoiceError::NotAPdf { .. }
                | InvoiceError::FileTooLarge { .. }
                | InvoiceError::CorruptPdf { .. }
                | InvoiceError::PasswordRequired { .. }
                | InvoiceError::WrongPassword { .. }
        )
    }
}

/// A non-fatal event recorded while producing a result.
///
/// The first four variants mark data that was lost or degraded; the rest
/// flag heuristics that shaped the output (multi-page merges, last-wins
/// overrides, duplicate removal) so they stay observable.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The page's image or text could not be produced; the page was excluded.
    #[error("Page {page}: skipped: {detail}")]
    PageProcessingSkipped { page: usize, detail: String },

    /// The classifier reply was unusable; the page was treated as non-invoice.
    #[error("Page {page}: classification downgraded to non-invoice: {detail}")]
    ClassificationMalformed { page: usize, detail: String },

    /// A line item or tax entry was not a JSON object and was left out.
    #[error("Page {page}: {field} entry {raw} is not an object, discarded")]
    EntryDiscarded {
        page: usize,
        field: String,
        raw: String,
    },

    /// A monetary field could not be parsed as a number; rendered raw.
    #[error("Invoice '{invoice_num}': {field} {raw:?} is not numeric, rendered as-is")]
    RenderCoercionFailure {
        invoice_num: String,
        field: String,
        raw: String,
    },

    /// Several pages were folded into one logical invoice.
    #[error("Invoice '{invoice_num}': merged pages {pages:?}")]
    PagesMerged { invoice_num: String, pages: Vec<usize> },

    /// A later page replaced an earlier, different value.
    #[error("Invoice '{invoice_num}': {field} {previous} replaced by {current} from page {page}")]
    ScalarOverridden {
        invoice_num: String,
        field: String,
        previous: String,
        current: String,
        page: usize,
    },

    /// An invoice identical on (number, vendor, date, total) was dropped.
    #[error("Duplicate invoice '{invoice_num}' from '{vendor_name}' removed")]
    DuplicateRemoved {
        invoice_num: String,
        vendor_name: String,
    },
}

impl Diagnostic {
    /// Page number this diagnostic is about, for page-scoped kinds.
    pub fn page(&self) -> Option<usize> {
        match self {
            Diagnostic::PageProcessingSkipped { page, .. }
            | Diagnostic::ClassificationMalformed { page, .. }
            | Diagnostic::EntryDiscarded { page, .. }
            | Diagnostic::ScalarOverridden { page, .. } => Some(*page),
            _ => None,
        }
    }

    /// Whether the diagnostic records lost or degraded data, as opposed to an
    /// informational note about a merge heuristic.
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            Diagnostic::PageProcessingSkipped { .. }
                | Diagnostic::ClassificationMalformed { .. }
                | Diagnostic::EntryDiscarded { .. }
                | Diagnostic::RenderCoercionFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display_mentions_page_and_hint() {
        let e = InvoiceError::ClassificationServiceUnavailable {
            page: 3,
            detail: "Connection refused".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 3"), "got: {msg}");
        assert!(msg.contains("ollama serve"));
        assert_eq!(e.stage(), Stage::Ingest);
    }

    #[test]
    fn source_errors_are_grouped() {
        let e = InvoiceError::CorruptPdf {
            path: "a.pdf".into(),
            detail: "bad xref".into(),
        };
        assert!(e.is_source_unavailable());
        assert_eq!(e.stage(), Stage::Setup);

        let e = InvoiceError::InvalidConfig("x".into());
        assert!(!e.is_source_unavailable());
    }

    #[test]
    fn diagnostic_serialises_with_kind_tag() {
        let d = Diagnostic::ClassificationMalformed {
            page: 2,
            detail: "not JSON".into(),
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["kind"], "classification_malformed");
        assert_eq!(json["page"], 2);
        assert_eq!(d.page(), Some(2));
        assert!(d.is_degradation());
    }

    #[test]
    fn merge_notes_are_not_degradations() {
        let d = Diagnostic::PagesMerged {
            invoice_num: "INV-1".into(),
            pages: vec![1, 2],
        };
        assert!(!d.is_degradation());
        assert_eq!(d.page(), None);
        assert!(d.to_string().contains("[1, 2]"));
    }
}
