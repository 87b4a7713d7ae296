//! Invoice data model: per-page classification results and merged invoices.
//!
//! Everything here is decoded from model-generated JSON, so decoding is
//! deliberately forgiving: `null` strings become `""`, numeric invoice numbers
//! become text, `null` collections become empty. Unknown keys are kept in the
//! `extra` map of the invoice, each line item and each tax entry, and
//! optional numbers that were never given stay absent, so the payload
//! re-encodes what the classifier said and nothing more.

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::fmt;

// ── Amount ───────────────────────────────────────────────────────────────

/// A numeric field as the classifier produced it.
///
/// Numbers are kept verbatim (`1180` stays an integer, `1180.5` a float) and
/// anything else is kept as text, so the JSON payload round-trips exactly what
/// the model said even when it is not a number (`"1,180.00"`, `"N/A"`).
#[derive(Debug, Clone, PartialEq)]
pub enum Amount {
    Number(Number),
    Text(String),
}

impl Default for Amount {
    fn default() -> Self {
        Amount::Number(Number::from(0))
    }
}

impl Amount {
    /// Build an amount from an arbitrary JSON value. `null` is zero.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Amount::default(),
            Value::Number(n) => Amount::Number(n),
            Value::String(s) => Amount::Text(s),
            other => Amount::Text(other.to_string()),
        }
    }

    /// A non-zero number or non-empty text.
    pub fn is_present(&self) -> bool {
        match self {
            Amount::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Amount::Text(s) => !s.is_empty(),
        }
    }

    /// Numeric value, if the amount is a number or text that parses as one.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            Amount::Number(n) => n.as_f64()?,
            Amount::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }

    /// Structural identity: numbers compare by value, text by exact string.
    pub fn key(&self) -> AmountKey {
        match self {
            Amount::Number(n) => match n.as_f64() {
                // -0.0 and 0.0 must collide
                Some(v) if v == 0.0 => AmountKey::Number(0f64.to_bits()),
                Some(v) => AmountKey::Number(v.to_bits()),
                None => AmountKey::Text(n.to_string()),
            },
            Amount::Text(s) => AmountKey::Text(s.clone()),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Number(n) => write!(f, "{n}"),
            Amount::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Amount {
    fn from(v: i64) -> Self {
        Amount::Number(Number::from(v))
    }
}

impl From<f64> for Amount {
    fn from(v: f64) -> Self {
        Number::from_f64(v)
            .map(Amount::Number)
            .unwrap_or_else(|| Amount::Text(v.to_string()))
    }
}

impl From<&str> for Amount {
    fn from(v: &str) -> Self {
        Amount::Text(v.to_string())
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Amount::Number(n) => n.serialize(serializer),
            Amount::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Amount::from_value)
    }
}

/// Hashable form of an [`Amount`] used in structural keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AmountKey {
    Number(u64),
    Text(String),
}

// ── Line items and tax ───────────────────────────────────────────────────

/// One row of an invoice's item table.
///
/// Numeric cells the model left out are `None` and are not re-encoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub hsn_sac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<Amount>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    /// Per-row keys outside the schema (`discount`, `gst_rate`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LineItem {
    /// Structural identity used to drop rows repeated across continuation pages.
    ///
    /// `unit` and `amount` are not part of it.
    pub fn identity(&self) -> LineItemKey {
        LineItemKey {
            description: self.description.clone(),
            hsn_sac: self.hsn_sac.clone(),
            quantity: self.quantity.as_ref().map(Amount::key),
            rate: self.rate.as_ref().map(Amount::key),
        }
    }
}

/// `(description, hsn_sac, quantity, rate)`. A missing number is distinct
/// from zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineItemKey {
    pub description: String,
    pub hsn_sac: String,
    pub quantity: Option<AmountKey>,
    pub rate: Option<AmountKey>,
}

/// A single tax-breakdown entry, e.g. `cgst: { rate: "9%", amount: 90 }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Page-level results ───────────────────────────────────────────────────

/// Fields extracted from one invoice page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFields {
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoice_num: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoice_date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vendor_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vendor_gstin: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub buyer_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub buyer_gstin: String,
    #[serde(default, deserialize_with = "lenient_line_items")]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub subtotal: Amount,
    #[serde(default, deserialize_with = "lenient_tax_breakdown")]
    pub tax_breakdown: IndexMap<String, TaxEntry>,
    #[serde(default)]
    pub total: Amount,
    /// Keys the model returned that are not part of the schema.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InvoiceFields {
    /// `(invoice_num, vendor_name, invoice_date)`; blanks compare equal.
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            invoice_num: self.invoice_num.clone(),
            vendor_name: self.vendor_name.clone(),
            invoice_date: self.invoice_date.clone(),
        }
    }
}

/// Whether a page was classified as an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Invoice,
    NonInvoice,
}

/// What the classifier found on a page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    Invoice(InvoiceFields),
    NonInvoice,
}

/// The typed classification result for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    /// 1-based page number in the source document.
    pub page_number: usize,
    pub content: PageContent,
}

impl PageResult {
    pub fn invoice(page_number: usize, fields: InvoiceFields) -> Self {
        Self {
            page_number,
            content: PageContent::Invoice(fields),
        }
    }

    pub fn non_invoice(page_number: usize) -> Self {
        Self {
            page_number,
            content: PageContent::NonInvoice,
        }
    }

    pub fn kind(&self) -> PageKind {
        match self.content {
            PageContent::Invoice(_) => PageKind::Invoice,
            PageContent::NonInvoice => PageKind::NonInvoice,
        }
    }

    pub fn fields(&self) -> Option<&InvoiceFields> {
        match &self.content {
            PageContent::Invoice(fields) => Some(fields),
            PageContent::NonInvoice => None,
        }
    }
}

// ── Merged invoices ──────────────────────────────────────────────────────

/// Grouping key for multi-page merging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub invoice_num: String,
    pub vendor_name: String,
    pub invoice_date: String,
}

/// Stricter key used for duplicate removal: the group key plus the total.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub group: GroupKey,
    pub total: AmountKey,
}

/// Key the merged record adds next to the extracted fields. Dropped from
/// [`InvoiceFields::extra`] at ingestion so it cannot appear twice.
pub const SOURCE_PAGES_KEY: &str = "source_pages";

/// One real-world invoice assembled from one or more pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalInvoice {
    #[serde(flatten)]
    pub fields: InvoiceFields,
    /// Pages that contributed to this invoice, ascending.
    pub source_pages: Vec<usize>,
}

/// A [`LogicalInvoice`] that survived duplicate removal.
pub type DeduplicatedInvoice = LogicalInvoice;

impl LogicalInvoice {
    pub fn group_key(&self) -> GroupKey {
        self.fields.group_key()
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            group: self.fields.group_key(),
            total: self.fields.total.key(),
        }
    }
}

// ── Lenient decoding helpers ─────────────────────────────────────────────

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Entries that are not objects are skipped; ingestion reports each one.
fn lenient_line_items<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<LineItem>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .filter(Value::is_object)
            .map(|item| serde_json::from_value(item).map_err(D::Error::custom))
            .collect(),
        other => Err(D::Error::custom(format!(
            "line_items must be an array, got {other}"
        ))),
    }
}

fn lenient_tax_breakdown<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<IndexMap<String, TaxEntry>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(IndexMap::new()),
        Value::Object(entries) => entries
            .into_iter()
            .filter(|(_, v)| v.is_object())
            .map(|(code, v)| {
                serde_json::from_value(v)
                    .map(|entry| (code, entry))
                    .map_err(D::Error::custom)
            })
            .collect(),
        other => Err(D::Error::custom(format!(
            "tax_breakdown must be an object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amount_presence() {
        assert!(!Amount::default().is_present());
        assert!(!Amount::from(0.0).is_present());
        assert!(!Amount::from("").is_present());
        assert!(Amount::from(1180_i64).is_present());
        assert!(Amount::from("0").is_present());
    }

    #[test]
    fn amount_coercion() {
        assert_eq!(Amount::from(1180_i64).as_f64(), Some(1180.0));
        assert_eq!(Amount::from(" 12.5 ").as_f64(), Some(12.5));
        assert_eq!(Amount::from("1,180.00").as_f64(), None);
        assert_eq!(Amount::from("inf").as_f64(), None);
    }

    #[test]
    fn amount_key_ignores_integer_float_distinction() {
        let int: Amount = serde_json::from_value(json!(2)).unwrap();
        let float: Amount = serde_json::from_value(json!(2.0)).unwrap();
        assert_ne!(int, float);
        assert_eq!(int.key(), float.key());
        assert_ne!(Amount::from("2").key(), int.key());
    }

    #[test]
    fn amount_serialises_verbatim() {
        let v: Amount = serde_json::from_value(json!(1180)).unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "1180");
        let v: Amount = serde_json::from_value(json!("N/A")).unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"N/A\"");
        let v: Amount = serde_json::from_value(Value::Null).unwrap();
        assert_eq!(v, Amount::default());
    }

    #[test]
    fn fields_decode_leniently() {
        let fields: InvoiceFields = serde_json::from_value(json!({
            "type": "invoice",
            "invoice_num": 4711,
            "vendor_name": null,
            "line_items": [
                {"description": "Bolt", "quantity": 2, "rate": 5, "amount": 10},
                "garbage"
            ],
            "tax_breakdown": {"cgst": {"rate": "9%", "amount": 0.9}, "note": "n/a"},
            "total": "10.90",
            "currency": "INR"
        }))
        .unwrap();

        assert_eq!(fields.invoice_num, "4711");
        assert_eq!(fields.vendor_name, "");
        assert_eq!(fields.line_items.len(), 1);
        assert_eq!(fields.tax_breakdown.len(), 1);
        assert_eq!(fields.total, Amount::from("10.90"));
        assert_eq!(fields.subtotal, Amount::default());
        assert_eq!(fields.extra.get("currency"), Some(&json!("INR")));
        assert_eq!(fields.extra.get("type"), Some(&json!("invoice")));
    }

    #[test]
    fn non_array_line_items_are_rejected() {
        let r: Result<InvoiceFields, _> =
            serde_json::from_value(json!({"line_items": "three bolts"}));
        assert!(r.is_err());
    }

    #[test]
    fn line_item_identity_ignores_amount_and_unit() {
        let a = LineItem {
            description: "Bolt".into(),
            quantity: Some(Amount::from(2_i64)),
            rate: Some(Amount::from(5_i64)),
            amount: Some(Amount::from(10_i64)),
            unit: "pcs".into(),
            ..Default::default()
        };
        let b = LineItem {
            amount: Some("ten".into()),
            unit: "".into(),
            ..a.clone()
        };
        assert_eq!(a.identity(), b.identity());

        let no_rate = LineItem {
            rate: None,
            ..a.clone()
        };
        let zero_rate = LineItem {
            rate: Some(Amount::from(0_i64)),
            ..a.clone()
        };
        assert_ne!(no_rate.identity(), zero_rate.identity());
    }

    #[test]
    fn line_item_and_tax_keys_outside_the_schema_survive() {
        let reply = json!({
            "line_items": [
                {"description": "Bolt", "quantity": 1, "rate": 5, "discount": "10%"}
            ],
            "tax_breakdown": {"cgst": {"rate": "9%", "amount": 9, "note": "x"}}
        });
        let fields: InvoiceFields = serde_json::from_value(reply.clone()).unwrap();
        assert_eq!(fields.line_items[0].extra.get("discount"), Some(&json!("10%")));
        assert_eq!(fields.tax_breakdown["cgst"].extra.get("note"), Some(&json!("x")));

        let back = serde_json::to_value(&fields).unwrap();
        assert_eq!(back["line_items"], reply["line_items"]);
        assert_eq!(back["tax_breakdown"], reply["tax_breakdown"]);
    }

    #[test]
    fn absent_numbers_are_not_invented() {
        let item: LineItem = serde_json::from_value(json!({"description": "Freight"})).unwrap();
        assert_eq!(item.amount, None);
        let out = serde_json::to_value(&item).unwrap();
        assert!(out.get("amount").is_none());
        assert!(out.get("quantity").is_none());

        let tax: TaxEntry = serde_json::from_value(json!({"rate": "18%"})).unwrap();
        assert!(serde_json::to_value(&tax).unwrap().get("amount").is_none());
    }

    #[test]
    fn page_result_kind() {
        let p = PageResult::non_invoice(3);
        assert_eq!(p.kind(), PageKind::NonInvoice);
        assert!(p.fields().is_none());
        let p = PageResult::invoice(1, InvoiceFields::default());
        assert_eq!(p.kind(), PageKind::Invoice);
    }

    #[test]
    fn logical_invoice_payload_keeps_field_order_and_pages() {
        let inv = LogicalInvoice {
            fields: InvoiceFields {
                invoice_num: "INV-1".into(),
                total: Amount::from(1180_i64),
                ..Default::default()
            },
            source_pages: vec![1, 2],
        };
        let json = serde_json::to_value(&inv).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.first().map(|k| k.as_str()), Some("invoice_num"));
        assert_eq!(keys.last().map(|k| k.as_str()), Some("source_pages"));
        assert_eq!(json["total"], json!(1180));

        let back: LogicalInvoice = serde_json::from_value(json).unwrap();
        assert_eq!(back, inv);
    }
}
