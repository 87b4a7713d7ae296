//! End-to-end tests against a real PDF and a real vision model.
//!
//! They need pdfium on the library path, a PDF in `./test_cases/`, and a
//! reachable model (default: `ollama serve` with `llava:7b`). Gated behind
//! `E2E_ENABLED` so they never run in CI by accident.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture

use edgequake_invoices::{
    extract_invoices, extract_invoices_from_bytes, extract_to_file, Diagnostic, ExtractionConfig,
    InvoiceError, PageSelection,
};
use std::path::PathBuf;

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip unless E2E_ENABLED is set and the PDF at `path` exists.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Structural checks every report must pass, whatever the model said.
fn assert_report_shape(report: &str, invoices: usize) {
    assert_eq!(
        report.matches("## Invoice #").count(),
        invoices,
        "one header per invoice"
    );
    assert_eq!(report.matches("\n---\n").count(), invoices);
    for line in report.lines().filter(|l| l.starts_with("| ")) {
        assert_eq!(line.matches(" | ").count(), 5, "six cells: {line}");
    }
}

#[tokio::test]
async fn test_extract_invoice_bundle() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("invoices.pdf"));

    let config = ExtractionConfig::builder().build().unwrap();
    let result = extract_invoices(&path, &config)
        .await
        .expect("extraction should succeed");

    println!("{}", result.report);
    for d in &result.diagnostics {
        println!("diagnostic: {d}");
    }
    println!("stats: {:?}", result.stats);

    assert_report_shape(&result.report, result.invoices.len());
    assert_eq!(
        result.stats.selected_pages,
        result.stats.classified_pages + result.stats.skipped_pages
    );
    let payload: serde_json::Value = serde_json::from_str(&result.payload).unwrap();
    assert_eq!(payload.as_array().map(Vec::len), Some(result.invoices.len()));
}

#[tokio::test]
async fn test_concurrent_extraction_from_bytes() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("invoices.pdf"));
    let bytes = std::fs::read(&path).unwrap();

    let config = ExtractionConfig::builder()
        .concurrency(4)
        .pages(PageSelection::Range(1, 4))
        .build()
        .unwrap();
    let result = extract_invoices_from_bytes(&bytes, &config)
        .await
        .expect("extraction should succeed");

    assert!(result.stats.selected_pages <= 4);
    assert_report_shape(&result.report, result.invoices.len());
    assert!(result
        .diagnostics
        .iter()
        .all(|d| !matches!(d, Diagnostic::PageProcessingSkipped { .. })));
}

#[tokio::test]
async fn test_extract_to_file() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("invoices.pdf"));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("report.md");

    let config = ExtractionConfig::builder()
        .pages(PageSelection::Single(1))
        .build()
        .unwrap();
    let result = extract_to_file(&path, &out, &config).await.unwrap();

    assert_eq!(std::fs::read_to_string(&out).unwrap(), result.report);
}

#[tokio::test]
async fn test_page_out_of_range() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("invoices.pdf"));

    let config = ExtractionConfig::builder()
        .pages(PageSelection::Single(10_000))
        .build()
        .unwrap();
    let err = extract_invoices(&path, &config).await.unwrap_err();
    assert!(matches!(err, InvoiceError::NoPagesSelected { .. }), "got: {err}");
}
