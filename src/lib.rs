//! # edgequake-invoices
//!
//! Extract invoices from scanned or digital PDF bundles with a Vision
//! Language Model, then merge multi-page invoices, drop duplicates and
//! render a Markdown report plus a JSON payload.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     validate the local file (exists, size, %PDF magic)
//!  ├─ 2. Render    rasterise pages via pdfium (spawn_blocking) + text layer
//!  ├─ 3. Classify  vision model: invoice JSON or {"type":"non_invoice"}
//!  ├─ 4. Ingest    untrusted reply → typed PageResult (malformed → non-invoice)
//!  ├─ 5. Merge     group by (number, vendor, date), union items and taxes
//!  ├─ 6. Dedup     drop repeats on (number, vendor, date, total)
//!  └─ 7. Format    Markdown report + JSON payload + diagnostics
//! ```
//!
//! A run either returns a complete [`Consolidation`] or one fatal
//! [`InvoiceError`]. Page-level trouble (a page that will not render, a model
//! reply that is not JSON, an amount that is not a number) never aborts the
//! run; it is recorded as a [`Diagnostic`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_invoices::{extract_invoices, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Local Ollama with llava:7b unless EDGEQUAKE_LLM_PROVIDER/EDGEQUAKE_MODEL say otherwise
//!     let config = ExtractionConfig::default();
//!     let result = extract_invoices("bills.pdf", &config).await?;
//!     println!("{}", result.report);
//!     eprintln!(
//!         "{} invoices, {} duplicates removed",
//!         result.stats.invoices, result.stats.duplicates_removed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! Callers that already have per-page results can skip rendering and the
//! model entirely with [`consolidate`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! edgequake-invoices = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod invoice;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection, ReportOptions};
pub use error::{Diagnostic, InvoiceError, Stage};
pub use extract::{
    consolidate, extract_invoices, extract_invoices_from_bytes, extract_sync, extract_to_file,
    write_atomic, Orchestrator,
};
pub use invoice::{
    Amount, DeduplicatedInvoice, InvoiceFields, LineItem, LogicalInvoice, PageContent, PageKind,
    PageResult, TaxEntry,
};
pub use output::{Consolidation, ExtractionStats};
pub use pipeline::classify::{ClassifierReply, ClassifyError, PageClassifier, VisionClassifier};
pub use pipeline::source::{DocumentSource, LoadedDocument, PageInput, PdfiumSource};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
