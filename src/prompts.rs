//! Prompts sent to the vision model.
//!
//! The JSON shape described in [`EXTRACTION_PROMPT`] is the contract that
//! [`crate::pipeline::ingest`] decodes, so the two must change together.
//! Callers can override the prompt via
//! [`crate::config::ExtractionConfig::system_prompt`].

/// Default prompt for classifying one page and extracting its invoice fields.
pub const EXTRACTION_PROMPT: &str = r#"You are an expert invoice processor. Analyse this page image and text carefully.

If the page is a TAX INVOICE, INVOICE, BILL or SALES RECEIPT, return ONLY valid JSON with exactly this structure:
{
  "type": "invoice",
  "invoice_num": "...",
  "invoice_date": "...",
  "vendor_name": "...",
  "vendor_gstin": "...",
  "buyer_name": "...",
  "buyer_gstin": "...",
  "line_items": [
    {"description": "...", "hsn_sac": "...", "quantity": 0, "rate": 0, "unit": "...", "amount": 0}
  ],
  "subtotal": 0,
  "tax_breakdown": {
    "cgst": {"rate": "9%", "amount": 0},
    "sgst": {"rate": "9%", "amount": 0},
    "igst": {"rate": "0%", "amount": 0}
  },
  "total": 0
}

If the page is NOT an invoice (delivery note, purchase order, e-way bill, voucher, weigh bridge slip, packing slip, payment receipt), return only:
{"type": "non_invoice"}

Rules:
- Numbers are plain numeric values: no currency symbols, no thousands separators
- Keep dates in the format printed on the document
- Include every visible line item
- Use "" for missing text and 0 for missing numbers
- Output JSON only: no explanations, no markdown fences"#;

/// Wrap a page's embedded text so the model can use it next to the image.
///
/// Scanned pages have no text layer; the caller skips this message then.
pub fn page_text_context(text: &str) -> String {
    format!(
        "Text extracted from the PDF text layer of this page (may be incomplete):\n\n\"\"\"{}\"\"\"",
        text.trim()
    )
}
