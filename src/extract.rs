//! Extraction entry points: run the whole pipeline over a document.
//!
//! ```text
//! source ──▶ classify ──▶ ingest ──▶ merge ──▶ dedup ──▶ format
//!  (pdfium)   (vision)    (typed)
//! ```
//!
//! [`Orchestrator`] owns the configuration and the classifier and runs the
//! stages in order, each on the full output of the previous one.
//! [`consolidate`] is the synchronous tail (merge, dedup, format) for callers
//! that already hold classified pages.
//!
//! Failures are split in two. Anything that makes a result impossible (the
//! document cannot be opened, the classification service is unreachable)
//! returns `Err` at once. Anything scoped to one page (render failure,
//! timeout, unusable reply) becomes a [`crate::Diagnostic`] and the page is
//! left out of the merge.

use crate::config::{ExtractionConfig, ReportOptions};
use crate::error::{InvoiceError, Stage};
use crate::invoice::{PageKind, PageResult};
use crate::output::{Consolidation, ExtractionStats};
use crate::pipeline::classify::{ClassifyError, PageClassifier, VisionClassifier};
use crate::pipeline::dedup::dedup_invoices;
use crate::pipeline::format::{render_payload, render_report};
use crate::pipeline::ingest::{ingest_reply, Ingested};
use crate::pipeline::input::{resolve_input, stage_bytes};
use crate::pipeline::merge::merge_pages;
use crate::pipeline::source::{DocumentSource, PageInput, PdfiumSource};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Merge, deduplicate and render already-classified pages.
///
/// Page order in `pages` does not matter. Non-invoice pages are counted and
/// otherwise ignored.
pub fn consolidate(
    pages: Vec<PageResult>,
    options: &ReportOptions,
) -> Result<Consolidation, InvoiceError> {
    consolidate_with(pages, options, |_| {})
}

/// [`consolidate`], announcing each stage before it runs.
fn consolidate_with(
    pages: Vec<PageResult>,
    options: &ReportOptions,
    mut on_stage: impl FnMut(Stage),
) -> Result<Consolidation, InvoiceError> {
    let start = Instant::now();
    let invoice_pages = pages
        .iter()
        .filter(|p| p.kind() == PageKind::Invoice)
        .count();
    let classified = pages.len();

    on_stage(Stage::Merge);
    info!("Merge: {} invoice pages of {}", invoice_pages, classified);
    let merged = merge_pages(pages);
    let merged_invoices = merged.groups.len();

    on_stage(Stage::Dedup);
    info!("Dedup: {} merged invoices", merged_invoices);
    let deduped = dedup_invoices(merged.groups);

    on_stage(Stage::Format);
    info!("Format: {} invoices", deduped.invoices.len());
    let (report, coercions) = render_report(&deduped.invoices, options);
    let payload = render_payload(&deduped.invoices)?;

    let mut diagnostics = merged.diagnostics;
    diagnostics.extend(deduped.diagnostics);
    diagnostics.extend(coercions);

    let stats = ExtractionStats {
        total_pages: classified,
        selected_pages: classified,
        classified_pages: classified,
        invoice_pages,
        non_invoice_pages: classified - invoice_pages,
        merged_invoices,
        duplicates_removed: deduped.duplicates,
        invoices: deduped.invoices.len(),
        consolidate_duration_ms: start.elapsed().as_millis() as u64,
        total_duration_ms: start.elapsed().as_millis() as u64,
        ..Default::default()
    };

    Ok(Consolidation {
        invoices: deduped.invoices,
        report,
        payload,
        diagnostics,
        stats,
    })
}

/// Runs the full pipeline with one configuration and one classifier.
pub struct Orchestrator {
    config: ExtractionConfig,
    classifier: Arc<dyn PageClassifier>,
}

/// What classifying one page produced.
struct PageOutcome {
    ingested: Ingested,
    input_tokens: u64,
    output_tokens: u64,
}

impl Orchestrator {
    pub fn new(config: ExtractionConfig, classifier: Arc<dyn PageClassifier>) -> Self {
        Self { config, classifier }
    }

    /// Use a [`VisionClassifier`] built from the config's provider settings.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, InvoiceError> {
        let classifier = VisionClassifier::from_config(&config)?;
        Ok(Self::new(config, Arc::new(classifier)))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Load `source`, classify every page, then consolidate.
    pub async fn run<S>(&self, source: S) -> Result<Consolidation, InvoiceError>
    where
        S: DocumentSource + 'static,
    {
        let total_start = Instant::now();
        info!("Starting extraction: {}", source.describe());

        // ── Load ─────────────────────────────────────────────────────────
        let render_start = Instant::now();
        let document = tokio::task::spawn_blocking(move || source.load())
            .await
            .map_err(|e| InvoiceError::Internal(format!("Render task panicked: {e}")))??;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;

        let selected = document.pages.len();
        info!(
            "Loaded {} of {} pages in {}ms",
            selected, document.total_pages, render_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(selected);
        }

        let mut diagnostics = Vec::new();
        let mut inputs = Vec::with_capacity(selected);
        for page in document.pages {
            match page {
                Ok(input) => inputs.push(input),
                Err(diag) => {
                    if let (Some(cb), Some(page)) = (&self.config.progress_callback, diag.page()) {
                        cb.on_page_skipped(page, selected, &diag.to_string());
                    }
                    diagnostics.push(diag);
                }
            }
        }
        let skipped_pages = diagnostics.len();

        // ── Ingest ───────────────────────────────────────────────────────
        self.enter(Stage::Ingest);
        info!(
            "Ingest: classifying {} pages (concurrency {})",
            inputs.len(),
            self.config.concurrency
        );
        let classify_start = Instant::now();
        let mut outcomes = self.classify_all(&inputs, selected).await?;
        let classify_duration_ms = classify_start.elapsed().as_millis() as u64;
        drop(inputs);

        outcomes.sort_by_key(|o| o.ingested.page.page_number);
        let total_input_tokens: u64 = outcomes.iter().map(|o| o.input_tokens).sum();
        let total_output_tokens: u64 = outcomes.iter().map(|o| o.output_tokens).sum();

        let mut pages = Vec::with_capacity(outcomes.len());
        let mut malformed_pages = 0;
        for outcome in outcomes {
            let Ingested {
                page,
                diagnostic,
                discarded,
            } = outcome.ingested;
            if let Some(diag) = diagnostic {
                malformed_pages += 1;
                diagnostics.push(diag);
            }
            diagnostics.extend(discarded);
            pages.push(page);
        }
        diagnostics.sort_by_key(|d| d.page());

        // ── Merge → Dedup → Format ───────────────────────────────────────
        let mut result = consolidate_with(pages, &self.config.report, |stage| self.enter(stage))?;
        diagnostics.append(&mut result.diagnostics);
        result.diagnostics = diagnostics;

        let stats = &mut result.stats;
        stats.total_pages = document.total_pages;
        stats.selected_pages = selected;
        stats.skipped_pages = skipped_pages;
        stats.malformed_pages = malformed_pages;
        stats.total_input_tokens = total_input_tokens;
        stats.total_output_tokens = total_output_tokens;
        stats.render_duration_ms = render_duration_ms;
        stats.classify_duration_ms = classify_duration_ms;
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "Extraction complete: {} invoices from {} pages ({} duplicates removed), {}ms",
            stats.invoices, selected, stats.duplicates_removed, stats.total_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(selected, result.invoices.len());
        }

        Ok(result)
    }

    fn enter(&self, stage: Stage) {
        debug!("Entering stage {}", stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(stage);
        }
    }

    /// Classify pages one at a time, or through a bounded pool when
    /// `concurrency > 1`. The first fatal error stops the pool, which drops
    /// every classification still in flight.
    async fn classify_all(
        &self,
        inputs: &[PageInput],
        total: usize,
    ) -> Result<Vec<PageOutcome>, InvoiceError> {
        let mut outcomes = Vec::with_capacity(inputs.len());

        if self.config.concurrency <= 1 {
            for input in inputs {
                outcomes.push(self.classify_page(input, total).await?);
            }
            return Ok(outcomes);
        }

        let mut pool = stream::iter(inputs.iter().map(|input| self.classify_page(input, total)))
            .buffer_unordered(self.config.concurrency);
        while let Some(outcome) = pool.next().await {
            outcomes.push(outcome?);
        }
        Ok(outcomes)
    }

    async fn classify_page(
        &self,
        input: &PageInput,
        total: usize,
    ) -> Result<PageOutcome, InvoiceError> {
        let page = input.page_number;
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_page_start(page, total);
        }

        let (ingested, input_tokens, output_tokens) = match self.classifier.classify(input).await {
            Ok(reply) => {
                debug!("Page {}: reply after {} retries", page, reply.retries);
                (
                    ingest_reply(page, &reply.raw),
                    reply.input_tokens as u64,
                    reply.output_tokens as u64,
                )
            }
            Err(ClassifyError::Unavailable(detail)) => {
                return Err(InvoiceError::ClassificationServiceUnavailable { page, detail })
            }
            Err(e) => (Ingested::downgraded(page, e.to_string()), 0, 0),
        };

        if let Some(cb) = cb {
            match &ingested.diagnostic {
                Some(diag) => cb.on_page_skipped(page, total, &diag.to_string()),
                None => cb.on_page_classified(page, total, ingested.page.kind()),
            }
        }

        Ok(PageOutcome {
            ingested,
            input_tokens,
            output_tokens,
        })
    }
}

/// Extract invoices from a PDF on disk.
///
/// # Example
/// ```rust,no_run
/// use edgequake_invoices::{extract_invoices, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::default(); // ollama, llava:7b
/// let result = extract_invoices("bills.pdf", &config).await?;
/// println!("{}", result.report);
/// for d in &result.diagnostics {
///     eprintln!("{d}");
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_invoices(
    input: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<Consolidation, InvoiceError> {
    let resolved = resolve_input(input, config.max_pdf_size_mb)?;
    let orchestrator = Orchestrator::from_config(config.clone())?;
    orchestrator
        .run(PdfiumSource::new(resolved, config))
        .await
}

/// Extract invoices from PDF bytes held in memory.
///
/// The bytes are staged in a temp file for pdfium, removed when the call
/// returns.
pub async fn extract_invoices_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<Consolidation, InvoiceError> {
    let staged = stage_bytes(bytes, config.max_pdf_size_mb)?;
    let orchestrator = Orchestrator::from_config(config.clone())?;
    orchestrator.run(PdfiumSource::new(staged, config)).await
}

/// Extract invoices and write the Markdown report to `output_path`.
///
/// The file is replaced atomically: nothing is written if extraction fails.
pub async fn extract_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<Consolidation, InvoiceError> {
    let result = extract_invoices(input, config).await?;
    write_atomic(output_path.as_ref(), &result.report).await?;
    Ok(result)
}

/// Blocking wrapper around [`extract_invoices`] with its own runtime.
pub fn extract_sync(
    input: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<Consolidation, InvoiceError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InvoiceError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(extract_invoices(input, config))
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), InvoiceError> {
    let write_err = |source| InvoiceError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            warn!("Could not remove {}: {}", tmp_path.display(), cleanup);
        }
        return Err(write_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{Amount, InvoiceFields};

    fn invoice_page(n: usize, num: &str, total: i64) -> PageResult {
        PageResult::invoice(
            n,
            InvoiceFields {
                invoice_num: num.into(),
                vendor_name: "Acme".into(),
                invoice_date: "2024-01-01".into(),
                total: Amount::from(total),
                ..Default::default()
            },
        )
    }

    #[test]
    fn consolidate_counts_every_stage() {
        let out = consolidate(
            vec![
                invoice_page(1, "A", 0),
                invoice_page(2, "A", 100),
                PageResult::non_invoice(3),
                invoice_page(4, "B", 50),
                invoice_page(5, "B", 50),
            ],
            &ReportOptions::default(),
        )
        .unwrap();

        // B's two pages merge (same key), so nothing is left to dedup.
        assert_eq!(out.stats.invoice_pages, 4);
        assert_eq!(out.stats.non_invoice_pages, 1);
        assert_eq!(out.stats.merged_invoices, 2);
        assert_eq!(out.stats.duplicates_removed, 0);
        assert_eq!(out.invoices.len(), 2);
        assert!(out.report.contains("## Invoice #A | Acme | 2024-01-01"));
        assert!(out.payload.contains("\"source_pages\""));
    }

    #[test]
    fn consolidate_of_nothing_is_empty() {
        let out = consolidate(Vec::new(), &ReportOptions::default()).unwrap();
        assert!(out.invoices.is_empty());
        assert!(out.report.is_empty());
        assert_eq!(out.payload, "[]");
    }

    #[tokio::test]
    async fn write_atomic_replaces_file_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.md");
        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn write_atomic_cleans_up_when_rename_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let path = dir.path().join("report.md");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        let err = write_atomic(&path, "report").await.unwrap_err();

        assert!(matches!(err, InvoiceError::OutputWriteFailed { .. }));
        assert!(!dir.path().join("report.md.tmp").exists());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn consolidate_announces_stages_in_order() {
        let mut seen = Vec::new();
        consolidate_with(
            vec![invoice_page(1, "A", 10)],
            &ReportOptions::default(),
            |stage| seen.push(stage),
        )
        .unwrap();
        assert_eq!(seen, vec![Stage::Merge, Stage::Dedup, Stage::Format]);
    }
}
