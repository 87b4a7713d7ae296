//! Formatter: render deduplicated invoices as a Markdown report and a JSON
//! payload.
//!
//! Both renderings are pure functions of their input. The report never
//! fails: an amount that cannot be read as a number is printed as the model
//! returned it and reported through [`Diagnostic::RenderCoercionFailure`].

use crate::config::ReportOptions;
use crate::error::{Diagnostic, InvoiceError};
use crate::invoice::{Amount, DeduplicatedInvoice};
use std::fmt::Write as _;

const TABLE_HEADER: &str = "| Description | HSN/SAC | Qty | Rate | Unit | Amount |\n";
const TABLE_RULE: &str = "|---|---|---|---|---|---|\n";

/// Render the Markdown report. Returns the report and any coercion
/// diagnostics, in the order the values were rendered.
pub fn render_report(
    invoices: &[DeduplicatedInvoice],
    options: &ReportOptions,
) -> (String, Vec<Diagnostic>) {
    let mut out = String::new();
    let mut diagnostics = Vec::new();
    for invoice in invoices {
        render_invoice(&mut out, invoice, options, &mut diagnostics);
    }
    (out, diagnostics)
}

/// Pretty-printed JSON array of the invoices, field order preserved and
/// non-ASCII text left unescaped.
pub fn render_payload(invoices: &[DeduplicatedInvoice]) -> Result<String, InvoiceError> {
    serde_json::to_string_pretty(invoices).map_err(InvoiceError::PayloadEncoding)
}

fn render_invoice(
    out: &mut String,
    invoice: &DeduplicatedInvoice,
    options: &ReportOptions,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let f = &invoice.fields;
    let zero = Amount::default();
    let mut money = MoneyCells {
        invoice_num: &f.invoice_num,
        currency: &options.currency_symbol,
        diagnostics,
    };

    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "## Invoice #{} | {} | {}\n",
        or_na(&f.invoice_num),
        or_na(&f.vendor_name),
        or_na(&f.invoice_date)
    );
    let _ = writeln!(
        out,
        "**Vendor**: {} (GSTIN: {})",
        or_na(&f.vendor_name),
        or_na(&f.vendor_gstin)
    );
    let _ = writeln!(
        out,
        "**Buyer**: {} (GSTIN: {})\n",
        or_na(&f.buyer_name),
        or_na(&f.buyer_gstin)
    );

    if !f.line_items.is_empty() {
        out.push_str(TABLE_HEADER);
        out.push_str(TABLE_RULE);
        for (i, item) in f.line_items.iter().enumerate() {
            let description = truncate_chars(
                &sanitize_cell(&item.description),
                options.description_max_chars,
            );
            let amount = money.plain(
                item.amount.as_ref().unwrap_or(&zero),
                &format!("line_items[{i}].amount"),
            );
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                description,
                sanitize_cell(&item.hsn_sac),
                sanitize_cell(&raw_or_zero(item.quantity.as_ref())),
                sanitize_cell(&raw_or_zero(item.rate.as_ref())),
                sanitize_cell(&item.unit),
                sanitize_cell(&amount),
            );
        }
        out.push('\n');
    }

    let subtotal = money.currency(&f.subtotal, "subtotal");
    let _ = writeln!(out, "**Subtotal**: {subtotal}");
    for (code, entry) in &f.tax_breakdown {
        let rate = entry
            .rate
            .as_ref()
            .map_or_else(|| "0%".to_string(), Amount::to_string);
        let amount = money.currency(
            entry.amount.as_ref().unwrap_or(&zero),
            &format!("tax_breakdown.{code}.amount"),
        );
        let _ = writeln!(out, "**{} ({})**: {}", code.to_uppercase(), rate, amount);
    }
    let total = money.currency(&f.total, "total");
    let _ = writeln!(out, "\n**Total**: {total}\n");
    out.push_str("---\n\n");
}

/// Renders amounts for one invoice, recording every fallback to raw text.
struct MoneyCells<'a> {
    invoice_num: &'a str,
    currency: &'a str,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl MoneyCells<'_> {
    fn plain(&mut self, amount: &Amount, field: &str) -> String {
        match amount.as_f64() {
            Some(v) => group_thousands(v),
            None => {
                self.diagnostics.push(Diagnostic::RenderCoercionFailure {
                    invoice_num: self.invoice_num.to_string(),
                    field: field.to_string(),
                    raw: amount.to_string(),
                });
                amount.to_string()
            }
        }
    }

    fn currency(&mut self, amount: &Amount, field: &str) -> String {
        let currency = self.currency;
        format!("{}{}", currency, self.plain(amount, field))
    }
}

/// `1234567.891` → `1,234,567.89`.
pub fn group_thousands(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value.is_sign_negative() && fixed != "0.00" {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped}.{frac_part}")
}

fn raw_or_zero(value: Option<&Amount>) -> String {
    value.map_or_else(|| "0".to_string(), Amount::to_string)
}

fn sanitize_cell(s: &str) -> String {
    s.replace('|', "/").replace(['\r', '\n'], " ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn or_na(s: &str) -> &str {
    if s.trim().is_empty() {
        "N/A"
    } else {
        s
    }
}
