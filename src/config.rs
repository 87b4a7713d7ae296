//! Configuration types for invoice extraction.
//!
//! Everything the pipeline needs (model endpoint, timeouts, render
//! resolution, report formatting) lives in one [`ExtractionConfig`] value
//! that is handed to the [`crate::Orchestrator`] when it is built. Nothing is
//! read from process-wide state once the config exists, so two extractions
//! with different settings can run side by side.

use crate::error::InvoiceError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::progress::ProgressCallback;

/// Default vision model, served by a local Ollama instance.
pub const DEFAULT_MODEL: &str = "llava:7b";

/// Default provider when nothing is configured.
pub const DEFAULT_PROVIDER: &str = "ollama";

/// Configuration for an extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_invoices::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .concurrency(4)
///     .model("llava:13b")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI for each PDF page. Range: 72–400. Default: 200.
    ///
    /// Invoices carry small print (GSTINs, HSN codes) that is unreadable to
    /// a vision model much below 200 DPI.
    pub dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 2400.
    pub max_rendered_pixels: u32,

    /// Number of pages classified at once. Default: 1 (strictly sequential).
    ///
    /// Results are always re-ordered by page number before merging, so this
    /// only changes wall-clock time, never the output.
    pub concurrency: usize,

    /// Model identifier. If None, [`DEFAULT_MODEL`] is used.
    pub model: Option<String>,

    /// Provider name (e.g. "ollama", "openai"). Falls back to
    /// `EDGEQUAKE_LLM_PROVIDER`, then [`DEFAULT_PROVIDER`].
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 2048.
    pub max_tokens: usize,

    /// Retries for a failed classification call. Default: 2.
    ///
    /// Connection failures are never retried; they abort the run.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call classification timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Send the page's extracted text alongside the image. Default: true.
    pub include_page_text: bool,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom extraction prompt. If None, uses [`crate::prompts::EXTRACTION_PROMPT`].
    pub system_prompt: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Reject input files larger than this. Default: 50.
    pub max_pdf_size_mb: u64,

    /// Report rendering options.
    pub report: ReportOptions,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2400,
            concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 2048,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            include_page_text: true,
            password: None,
            system_prompt: None,
            pages: PageSelection::default(),
            max_pdf_size_mb: 50,
            report: ReportOptions::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("include_page_text", &self.include_page_text)
            .field("pages", &self.pages)
            .field("max_pdf_size_mb", &self.max_pdf_size_mb)
            .field("report", &self.report)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model that will be requested.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn include_page_text(mut self, v: bool) -> Self {
        self.config.include_page_text = v;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn max_pdf_size_mb(mut self, mb: u64) -> Self {
        self.config.max_pdf_size_mb = mb;
        self
    }

    pub fn currency_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.config.report.currency_symbol = symbol.into();
        self
    }

    pub fn description_max_chars(mut self, n: usize) -> Self {
        self.config.report.description_max_chars = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, InvoiceError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(InvoiceError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(InvoiceError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(InvoiceError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if c.report.description_max_chars == 0 {
            return Err(InvoiceError::InvalidConfig(
                "Description width must be ≥ 1 character".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Options for the Markdown report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOptions {
    /// Prefix for every monetary value outside the item table. Default: "₹".
    pub currency_symbol: String,
    /// Descriptions longer than this are cut in the item table. Default: 50.
    pub description_max_chars: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            currency_symbol: "₹".to_string(),
            description_max_chars: 50,
        }
    }
}

/// Specifies which pages of the PDF to process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Sorted, deduplicated 0-indexed page numbers within `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let in_range = |p: &usize| *p >= 1 && *p <= total_pages;
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => Some(*p)
                .filter(in_range)
                .map(|p| p - 1)
                .into_iter()
                .collect(),
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|p| in_range(*p))
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_sequential_baseline() {
        let c = ExtractionConfig::default();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.dpi, 200);
        assert_eq!(c.model_or_default(), "llava:7b");
        assert_eq!(c.report.currency_symbol, "₹");
        assert_eq!(c.report.description_max_chars, 50);
    }

    #[test]
    fn builder_rejects_bad_dpi() {
        let err = ExtractionConfig::builder().dpi(20).build().unwrap_err();
        assert!(err.to_string().contains("DPI"));
    }

    #[test]
    fn builder_rejects_zero_concurrency() {
        assert!(ExtractionConfig::builder().concurrency(0).build().is_err());
    }

    #[test]
    fn builder_sets_report_options() {
        let c = ExtractionConfig::builder()
            .currency_symbol("$")
            .description_max_chars(20)
            .build()
            .unwrap();
        assert_eq!(c.report.currency_symbol, "$");
        assert_eq!(c.report.description_max_chars, 20);
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Single(2).to_indices(3), vec![1]);
        assert_eq!(PageSelection::Single(9).to_indices(3), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 10).to_indices(4), vec![1, 2, 3]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3, 0]).to_indices(5), vec![0, 2]);
    }
}
