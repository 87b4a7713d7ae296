//! CLI binary for edgequake-invoices.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs the extraction and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_invoices::{
    extract_invoices, write_atomic, Consolidation, ExtractionConfig, ExtractionProgressCallback,
    PageKind, PageSelection, ProgressCallback, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar with one log line per page. Pages may finish out of
/// order when `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    invoice_pages: AtomicUsize,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner only; `on_extraction_start` switches to a bar once the page
    /// count is known.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            invoice_pages: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Classifying");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Classifying {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_classified(&self, page_num: usize, total: usize, kind: PageKind) {
        let elapsed = self.elapsed_secs(page_num);
        let label = match kind {
            PageKind::Invoice => {
                self.invoice_pages.fetch_add(1, Ordering::SeqCst);
                green("invoice")
            }
            PageKind::NonInvoice => dim("other"),
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            label,
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_skipped(&self, page_num: usize, total: usize, reason: &str) {
        let elapsed = self.elapsed_secs(page_num);
        self.skipped.fetch_add(1, Ordering::SeqCst);

        let msg: String = if reason.chars().count() > 80 {
            let cut: String = reason.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            reason.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            yellow("⚠"),
            page_num,
            total,
            yellow(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_stage(&self, stage: Stage) {
        if stage != Stage::Ingest {
            self.bar.set_message(format!("{stage}…"));
        }
    }

    fn on_extraction_complete(&self, total_pages: usize, invoice_count: usize) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        let tick = if skipped == 0 { green("✔") } else { yellow("⚠") };
        eprintln!(
            "{} {} invoices from {} invoice pages of {}{}",
            tick,
            bold(&invoice_count.to_string()),
            self.invoice_pages.load(Ordering::SeqCst),
            total_pages,
            if skipped > 0 {
                format!("  ({} pages skipped)", yellow(&skipped.to_string()))
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Report to stdout (local Ollama, llava:7b)
  invoice2md bills.pdf

  # Report to a file
  invoice2md bills.pdf -o invoices.md

  # JSON payload instead of Markdown
  invoice2md --json bills.pdf -o invoices.json

  # Hosted model, four pages at a time
  invoice2md --provider openai --model gpt-4.1-mini -c 4 bills.pdf

  # Only pages 3 to 10, dollar amounts
  invoice2md --pages 3-10 --currency '$' bills.pdf

ENVIRONMENT VARIABLES:
  EDGEQUAKE_LLM_PROVIDER  Provider (ollama, openai, anthropic, gemini). Default: ollama
  EDGEQUAKE_MODEL         Model ID. Default: llava:7b
  OPENAI_API_KEY          Needed for --provider openai
  ANTHROPIC_API_KEY       Needed for --provider anthropic
  GEMINI_API_KEY          Needed for --provider gemini
  INVOICE2MD_*            Every flag below has an INVOICE2MD_ variable
  RUST_LOG                Overrides the log filter (e.g. edgequake_invoices=debug)

SETUP:
  1. Start a local model:  ollama serve && ollama pull llava:7b
  2. Extract:              invoice2md bills.pdf -o invoices.md

  pdfium must be installed as a shared library (libpdfium) on the library path.
"#;

/// Extract, merge and deduplicate invoices from a PDF using a Vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2md",
    version,
    about = "Extract invoices from PDF bundles into a Markdown report using Vision LLMs",
    long_about = "Render each page of a PDF, ask a Vision Language Model whether it is an \
invoice and what it contains, merge invoices that span several pages, drop duplicates, and \
print a Markdown report (or the JSON payload with --json).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    input: PathBuf,

    /// Write the report to this file instead of stdout.
    #[arg(short, long, env = "INVOICE2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model ID (e.g. llava:7b, llama3.2-vision, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: ollama, openai, anthropic, gemini.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "INVOICE2MD_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Pages classified at once. 1 keeps strict page order.
    #[arg(short, long, env = "INVOICE2MD_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "INVOICE2MD_PAGES", default_value = "all")]
    pages: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "INVOICE2MD_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "INVOICE2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Do not send the PDF text layer alongside the page image.
    #[arg(long, env = "INVOICE2MD_NO_PAGE_TEXT")]
    no_page_text: bool,

    /// Max LLM output tokens per page.
    #[arg(long, env = "INVOICE2MD_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "INVOICE2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per page on a failed or timed-out call.
    #[arg(long, env = "INVOICE2MD_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "INVOICE2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Reject PDFs larger than this many MB.
    #[arg(long, env = "INVOICE2MD_MAX_SIZE_MB", default_value_t = 50)]
    max_size_mb: u64,

    /// Currency symbol in the report.
    #[arg(long, env = "INVOICE2MD_CURRENCY", default_value = "₹")]
    currency: String,

    /// Truncate line-item descriptions to this many characters.
    #[arg(long, env = "INVOICE2MD_DESCRIPTION_WIDTH", default_value_t = 50)]
    description_width: usize,

    /// Output the JSON payload instead of the Markdown report.
    #[arg(long, env = "INVOICE2MD_JSON")]
    json: bool,

    /// Print every diagnostic, not only degradations.
    #[arg(long, env = "INVOICE2MD_ALL_DIAGNOSTICS")]
    all_diagnostics: bool,

    /// Disable progress bar.
    #[arg(long, env = "INVOICE2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE2MD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let result = extract_invoices(&cli.input, &config)
        .await
        .context("Extraction failed")?;

    let body = if cli.json {
        &result.payload
    } else {
        &result.report
    };

    match cli.output {
        Some(ref output_path) => {
            write_atomic(output_path, body)
                .await
                .context("Failed to write output")?;
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(body.as_bytes())
                .context("Failed to write to stdout")?;
            if !body.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }

    if !cli.quiet {
        print_summary(&cli, &result);
    }

    Ok(())
}

/// Diagnostics and totals on stderr.
fn print_summary(cli: &Cli, result: &Consolidation) {
    let shown: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| cli.all_diagnostics || d.is_degradation())
        .collect();
    for d in &shown {
        eprintln!("  {} {}", yellow("⚠"), d);
    }

    let stats = &result.stats;
    let target = cli
        .output
        .as_ref()
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {} invoices  ({} pages, {} duplicates removed)  {}ms{}",
        if stats.skipped_pages + stats.malformed_pages == 0 {
            green("✔")
        } else {
            yellow("⚠")
        },
        stats.invoices,
        stats.selected_pages,
        stats.duplicates_removed,
        stats.total_duration_ms,
        target,
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&stats.total_input_tokens.to_string()),
        dim(&stats.total_output_tokens.to_string()),
    );
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let pages = parse_pages(&cli.pages)?;

    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .pages(pages)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .include_page_text(!cli.no_page_text)
        .max_pdf_size_mb(cli.max_size_mb)
        .currency_symbol(cli.currency.clone())
        .description_max_chars(cli.description_width);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pages_forms() {
        assert_eq!(parse_pages("all").unwrap(), PageSelection::All);
        assert_eq!(parse_pages(" 4 ").unwrap(), PageSelection::Single(4));
        assert_eq!(parse_pages("2-5").unwrap(), PageSelection::Range(2, 5));
        assert_eq!(parse_pages("1,3").unwrap(), PageSelection::Set(vec![1, 3]));
    }

    #[test]
    fn parse_pages_rejects_bad_input() {
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("5-2").is_err());
        assert!(parse_pages("1,x").is_err());
        assert!(parse_pages("0,2").is_err());
    }

    #[test]
    fn cli_defaults_match_library_defaults() {
        let cli = Cli::try_parse_from(["invoice2md", "bills.pdf"]).unwrap();
        assert_eq!(cli.dpi, 200);
        assert_eq!(cli.concurrency, 1);
        assert_eq!(cli.api_timeout, 120);
        assert_eq!(cli.currency, "₹");
    }
}
