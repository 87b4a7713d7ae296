//! Page classification: ask a vision model what a page is.
//!
//! [`PageClassifier`] returns the model's raw reply; turning it into a typed
//! result is [`crate::pipeline::ingest`]'s job. The split keeps transport
//! failures (this module) apart from content failures (ingest).
//!
//! ## Failure classes
//!
//! * The service cannot be reached at all (connection refused, DNS failure):
//!   [`ClassifyError::Unavailable`], returned at once without retrying since
//!   every later page would fail the same way. The orchestrator aborts.
//! * The call timed out or the provider returned an error:
//!   retried with exponential backoff (`retry_backoff_ms * 2^(attempt - 1)`), then
//!   [`ClassifyError::Timeout`] / [`ClassifyError::Failed`]. The orchestrator
//!   downgrades the page and carries on.

use crate::config::{ExtractionConfig, DEFAULT_PROVIDER};
use crate::error::InvoiceError;
use crate::pipeline::source::PageInput;
use crate::prompts::{page_text_context, EXTRACTION_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// The classifier's raw answer for one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierReply {
    pub raw: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
}

impl ClassifierReply {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifyError {
    /// The service could not be reached.
    #[error("classification service unreachable: {0}")]
    Unavailable(String),

    #[error("classification timed out after {secs}s ({attempts} attempts)")]
    Timeout { secs: u64, attempts: u32 },

    #[error("classification failed after {attempts} attempts: {detail}")]
    Failed { attempts: u32, detail: String },
}

/// Classifies a single page.
pub trait PageClassifier: Send + Sync {
    fn classify<'a>(
        &'a self,
        page: &'a PageInput,
    ) -> BoxFuture<'a, Result<ClassifierReply, ClassifyError>>;
}

/// [`PageClassifier`] backed by an `edgequake_llm` vision provider.
pub struct VisionClassifier {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    include_page_text: bool,
    call_timeout: Duration,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl VisionClassifier {
    /// Build from config, resolving the provider (see [`resolve_provider`]).
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, InvoiceError> {
        let provider = resolve_provider(config)?;
        Ok(Self::with_provider(provider, config))
    }

    pub fn with_provider(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_PROMPT.to_string()),
            options: build_options(config),
            include_page_text: config.include_page_text,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// System prompt, then the page's text layer when present, then the image.
    fn build_messages(&self, page: &PageInput) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(&self.system_prompt)];
        if self.include_page_text && !page.text.trim().is_empty() {
            messages.push(ChatMessage::user(page_text_context(&page.text)));
        }
        messages.push(ChatMessage::user_with_images("", vec![page.image.clone()]));
        messages
    }

    async fn classify_page(&self, page: &PageInput) -> Result<ClassifierReply, ClassifyError> {
        let start = Instant::now();
        let page_num = page.page_number;
        let messages = self.build_messages(page);
        let attempts = self.max_retries.saturating_add(1);
        let mut last_failure: Option<ClassifyError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page_num, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(
                self.call_timeout,
                self.provider.chat(&messages, Some(&self.options)),
            )
            .await
            {
                Ok(Ok(response)) => {
                    debug!(
                        "Page {}: {} input tokens, {} output tokens, {:?}",
                        page_num,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(ClassifierReply {
                        raw: response.content,
                        input_tokens: response.prompt_tokens as usize,
                        output_tokens: response.completion_tokens as usize,
                        retries: attempt,
                    });
                }
                Ok(Err(e)) => {
                    let detail = e.to_string();
                    if is_connectivity_error(&detail) {
                        return Err(ClassifyError::Unavailable(detail));
                    }
                    warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, detail);
                    last_failure = Some(ClassifyError::Failed { attempts, detail });
                }
                Err(_) => {
                    warn!(
                        "Page {}: attempt {} timed out after {}s",
                        page_num,
                        attempt + 1,
                        self.call_timeout.as_secs()
                    );
                    last_failure = Some(ClassifyError::Timeout {
                        secs: self.call_timeout.as_secs(),
                        attempts,
                    });
                }
            }
        }

        Err(last_failure.unwrap_or(ClassifyError::Failed {
            attempts,
            detail: "no attempt was made".into(),
        }))
    }
}

impl PageClassifier for VisionClassifier {
    fn classify<'a>(
        &'a self,
        page: &'a PageInput,
    ) -> BoxFuture<'a, Result<ClassifierReply, ClassifyError>> {
        Box::pin(self.classify_page(page))
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`,
/// saturating instead of overflowing.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

static RE_CONNECTIVITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)connection refused|error trying to connect|failed to connect|could not connect|couldn't connect|dns error|failed to lookup address|tcp connect|network is unreachable|no route to host",
    )
    .expect("connectivity pattern is valid")
});

/// Whether a provider error means the service is not reachable at all.
pub fn is_connectivity_error(detail: &str) -> bool {
    RE_CONNECTIVITY.is_match(detail)
}

/// Resolve the vision provider, from most to least specific:
///
/// 1. `config.provider`, used as-is;
/// 2. `config.provider_name` with `config.model` (or [`DEFAULT_MODEL`]);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set;
/// 4. [`DEFAULT_PROVIDER`] with the configured or default model.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let model = config.model.clone().unwrap_or(model);
            return create_vision_provider(&prov, &model);
        }
    }

    create_vision_provider(DEFAULT_PROVIDER, config.model_or_default())
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    info!("Using provider {} with model {}", provider_name, model);
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoiceError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
