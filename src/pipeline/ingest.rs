//! Ingestion: turn one raw classifier reply into a typed [`PageResult`].
//!
//! Model output is untrusted text. Anything that is not the JSON shape from
//! [`crate::prompts::EXTRACTION_PROMPT`] becomes a non-invoice page plus a
//! [`Diagnostic::ClassificationMalformed`]; ingestion itself never fails.
//! An explicit `{"type": "non_invoice"}` is a normal answer and produces no
//! diagnostic. Line items or tax entries that are not objects are left out
//! of an otherwise usable invoice, one [`Diagnostic::EntryDiscarded`] each.

use crate::error::Diagnostic;
use crate::invoice::{InvoiceFields, PageResult, SOURCE_PAGES_KEY};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A page's typed result plus the diagnostic explaining a downgrade, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub page: PageResult,
    pub diagnostic: Option<Diagnostic>,
    /// Entries dropped from a usable invoice.
    pub discarded: Vec<Diagnostic>,
}

impl Ingested {
    fn ok(page: PageResult) -> Self {
        Self {
            page,
            diagnostic: None,
            discarded: Vec::new(),
        }
    }

    /// Downgrade to non-invoice and record why.
    pub fn downgraded(page_number: usize, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        warn!("Page {}: treated as non-invoice: {}", page_number, detail);
        Self {
            page: PageResult::non_invoice(page_number),
            diagnostic: Some(Diagnostic::ClassificationMalformed {
                page: page_number,
                detail,
            }),
            discarded: Vec::new(),
        }
    }
}

/// Parse the classifier's raw reply for `page_number`.
pub fn ingest_reply(page_number: usize, raw: &str) -> Ingested {
    let body = strip_fences(raw);
    if body.is_empty() {
        return Ingested::downgraded(page_number, "empty classifier reply");
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            return Ingested::downgraded(
                page_number,
                format!("reply is not JSON ({e}): {}", preview(body)),
            )
        }
    };

    let Value::Object(map) = value else {
        return Ingested::downgraded(page_number, "reply is not a JSON object");
    };

    match map.get("type").and_then(Value::as_str) {
        Some("invoice") => {
            let discarded = non_object_entries(page_number, &map);
            match serde_json::from_value::<InvoiceFields>(Value::Object(map)) {
                Ok(mut fields) => {
                    if fields.extra.contains_key(SOURCE_PAGES_KEY) {
                        warn!(
                            "Page {}: ignoring reserved key {:?} in classifier reply",
                            page_number, SOURCE_PAGES_KEY
                        );
                        fields.extra = std::mem::take(&mut fields.extra)
                            .into_iter()
                            .filter(|(k, _)| k != SOURCE_PAGES_KEY)
                            .collect();
                    }
                    debug!(
                        "Page {}: invoice {:?} from {:?}, {} line items",
                        page_number,
                        fields.invoice_num,
                        fields.vendor_name,
                        fields.line_items.len()
                    );
                    for d in &discarded {
                        warn!("{}", d);
                    }
                    Ingested {
                        discarded,
                        ..Ingested::ok(PageResult::invoice(page_number, fields))
                    }
                }
                Err(e) => {
                    Ingested::downgraded(page_number, format!("invoice fields unusable: {e}"))
                }
            }
        }
        Some("non_invoice") => {
            debug!("Page {}: non-invoice", page_number);
            Ingested::ok(PageResult::non_invoice(page_number))
        }
        Some(other) => Ingested::downgraded(page_number, format!("unknown page type {other:?}")),
        None => Ingested::downgraded(page_number, "reply has no \"type\" field"),
    }
}

/// Line items and tax entries the lenient decoder will skip.
fn non_object_entries(page_number: usize, map: &Map<String, Value>) -> Vec<Diagnostic> {
    let discard = |field: String, raw: &Value| Diagnostic::EntryDiscarded {
        page: page_number,
        field,
        raw: preview(&raw.to_string()),
    };

    let mut out = Vec::new();
    if let Some(Value::Array(items)) = map.get("line_items") {
        out.extend(
            items
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_object())
                .map(|(i, v)| discard(format!("line_items[{i}]"), v)),
        );
    }
    if let Some(Value::Object(taxes)) = map.get("tax_breakdown") {
        out.extend(
            taxes
                .iter()
                .filter(|(_, v)| !v.is_object())
                .map(|(code, v)| discard(format!("tax_breakdown.{code}"), v)),
        );
    }
    out
}

/// Trim the reply and, when the model wrapped it in a code fence anyway,
/// keep only the outermost `{…}`.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => "",
    }
}

fn preview(s: &str) -> String {
    const MAX: usize = 60;
    if s.chars().count() > MAX {
        let cut: String = s.chars().take(MAX).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}
