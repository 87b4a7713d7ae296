//! Merge: fold the pages of a multi-page invoice into one record.
//!
//! Pages are grouped by `(invoice_num, vendor_name, invoice_date)`. Within a
//! group, pages are applied in ascending page order:
//!
//! * scalar identity fields (GSTINs, buyer, unknown keys) come from the first page;
//! * line items are concatenated, then repeated rows are dropped on
//!   `(description, hsn_sac, quantity, rate)`, first occurrence kept;
//! * tax codes are unioned, a later page overwriting an earlier value;
//! * `subtotal` and `total` take the last page that supplies a non-zero,
//!   non-empty value, since summary figures sit on trailing pages.
//!
//! The last-wins rules make the result depend on page order, which is why
//! [`merge_pages`] sorts its input itself. Blank keys are not special: two
//! invoices that both lack a number, vendor and date end up in one group.

use crate::error::Diagnostic;
use crate::invoice::{
    Amount, GroupKey, InvoiceFields, LineItem, LineItemKey, LogicalInvoice, PageContent,
    PageResult,
};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::mem;
use tracing::{debug, info, warn};

/// Groups produced by [`merge_pages`], in first-seen key order.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub groups: Vec<LogicalInvoice>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Group invoice pages into logical invoices. Non-invoice pages are ignored.
pub fn merge_pages(pages: Vec<PageResult>) -> MergeOutcome {
    let mut invoice_pages: Vec<(usize, InvoiceFields)> = pages
        .into_iter()
        .filter_map(|p| match p.content {
            PageContent::Invoice(fields) => Some((p.page_number, fields)),
            PageContent::NonInvoice => None,
        })
        .collect();
    invoice_pages.sort_by_key(|(page, _)| *page);

    let mut builders: IndexMap<GroupKey, GroupBuilder> = IndexMap::new();
    for (page, fields) in invoice_pages {
        let key = fields.group_key();
        match builders.get_mut(&key) {
            Some(builder) => builder.absorb(page, fields),
            None => {
                builders.insert(key, GroupBuilder::seed(page, fields));
            }
        }
    }

    let mut diagnostics = Vec::new();
    let groups = builders
        .into_values()
        .map(|builder| builder.finish(&mut diagnostics))
        .collect();

    MergeOutcome {
        groups,
        diagnostics,
    }
}

/// Accumulator for one group while its pages arrive.
struct GroupBuilder {
    merged: InvoiceFields,
    pages: Vec<usize>,
    seen_items: HashSet<LineItemKey>,
    overrides: Vec<Diagnostic>,
}

impl GroupBuilder {
    fn seed(page: usize, mut fields: InvoiceFields) -> Self {
        let items = mem::take(&mut fields.line_items);
        let taxes = mem::take(&mut fields.tax_breakdown);
        let mut builder = Self {
            merged: fields,
            pages: vec![page],
            seen_items: HashSet::new(),
            overrides: Vec::new(),
        };
        builder.push_items(items);
        builder.merged.tax_breakdown.extend(taxes);
        builder
    }

    fn absorb(&mut self, page: usize, fields: InvoiceFields) {
        debug!(
            "Page {}: continues invoice {:?}",
            page, self.merged.invoice_num
        );
        self.pages.push(page);
        self.push_items(fields.line_items);
        // IndexMap::extend keeps a re-inserted code at its original position.
        self.merged.tax_breakdown.extend(fields.tax_breakdown);

        let num = &self.merged.invoice_num;
        let subtotal =
            take_if_present(&mut self.merged.subtotal, fields.subtotal, "subtotal", page, num);
        let total = take_if_present(&mut self.merged.total, fields.total, "total", page, num);
        self.overrides.extend(subtotal.into_iter().chain(total));
    }

    fn push_items(&mut self, items: Vec<LineItem>) {
        for item in items {
            if self.seen_items.insert(item.identity()) {
                self.merged.line_items.push(item);
            }
        }
    }

    fn finish(self, diagnostics: &mut Vec<Diagnostic>) -> LogicalInvoice {
        let invoice_num = self.merged.invoice_num.clone();
        if invoice_num.is_empty() {
            warn!(
                "Invoice without a number on page(s) {:?}; pages sharing a blank number, vendor and date are merged",
                self.pages
            );
        }
        if self.pages.len() > 1 {
            info!("Merging {} pages for invoice {:?}", self.pages.len(), invoice_num);
            diagnostics.push(Diagnostic::PagesMerged {
                invoice_num,
                pages: self.pages.clone(),
            });
        }
        diagnostics.extend(self.overrides);

        LogicalInvoice {
            fields: self.merged,
            source_pages: self.pages,
        }
    }
}

/// Replace `slot` with `incoming` when `incoming` is present. Reports the
/// replacement when it discards a different present value.
fn take_if_present(
    slot: &mut Amount,
    incoming: Amount,
    field: &str,
    page: usize,
    invoice_num: &str,
) -> Option<Diagnostic> {
    if !incoming.is_present() {
        return None;
    }
    let note = (slot.is_present() && slot.key() != incoming.key()).then(|| {
        Diagnostic::ScalarOverridden {
            invoice_num: invoice_num.to_string(),
            field: field.to_string(),
            previous: slot.to_string(),
            current: incoming.to_string(),
            page,
        }
    });
    *slot = incoming;
    note
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::TaxEntry;

    fn item(desc: &str, qty: i64, rate: i64) -> LineItem {
        LineItem {
            description: desc.into(),
            quantity: Some(Amount::from(qty)),
            rate: Some(Amount::from(rate)),
            amount: Some(Amount::from(qty * rate)),
            ..Default::default()
        }
    }

    fn page(n: usize, num: &str, items: Vec<LineItem>, total: i64) -> PageResult {
        PageResult::invoice(
            n,
            InvoiceFields {
                invoice_num: num.into(),
                vendor_name: "Acme".into(),
                invoice_date: "2024-01-01".into(),
                line_items: items,
                total: Amount::from(total),
                ..Default::default()
            },
        )
    }

    #[test]
    fn continuation_pages_merge_into_one_group() {
        let out = merge_pages(vec![
            page(1, "INV-1", vec![item("Bolt", 2, 5), item("Nut", 4, 1)], 0),
            page(2, "INV-1", vec![item("Washer", 10, 1)], 1180),
        ]);
        assert_eq!(out.groups.len(), 1);
        let inv = &out.groups[0];
        assert_eq!(inv.fields.line_items.len(), 3);
        assert_eq!(inv.fields.total, Amount::from(1180_i64));
        assert_eq!(inv.source_pages, vec![1, 2]);
        assert!(matches!(out.diagnostics[0], Diagnostic::PagesMerged { .. }));
    }

    #[test]
    fn repeated_rows_keep_first_occurrence() {
        let mut repeated = item("Bolt", 2, 5);
        repeated.amount = Some(Amount::from("ten"));
        let out = merge_pages(vec![
            page(1, "INV-1", vec![item("Bolt", 2, 5)], 0),
            page(2, "INV-1", vec![repeated, item("Bolt", 3, 5)], 0),
        ]);
        let items = &out.groups[0].fields.line_items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].amount, Some(Amount::from(10_i64)));
        assert_eq!(items[1].quantity, Some(Amount::from(3_i64)));
    }

    #[test]
    fn out_of_order_input_is_sorted_before_last_wins() {
        let out = merge_pages(vec![
            page(3, "INV-1", vec![], 300),
            page(1, "INV-1", vec![], 100),
            page(2, "INV-1", vec![], 0),
        ]);
        let inv = &out.groups[0];
        assert_eq!(inv.source_pages, vec![1, 2, 3]);
        assert_eq!(inv.fields.total, Amount::from(300_i64));
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::ScalarOverridden { page: 3, field, .. } if field == "total"
        )));
    }

    #[test]
    fn absent_later_totals_do_not_erase_earlier_ones() {
        let out = merge_pages(vec![
            page(1, "INV-1", vec![], 500),
            page(2, "INV-1", vec![], 0),
        ]);
        assert_eq!(out.groups[0].fields.total, Amount::from(500_i64));
        assert!(!out
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::ScalarOverridden { .. })));
    }

    #[test]
    fn tax_codes_union_with_later_page_winning() {
        let mut p1 = page(1, "INV-1", vec![], 0);
        let mut p2 = page(2, "INV-1", vec![], 0);
        let tax = |amount: i64| TaxEntry {
            rate: Some(Amount::from("9%")),
            amount: Some(Amount::from(amount)),
            ..Default::default()
        };
        if let PageContent::Invoice(f) = &mut p1.content {
            f.tax_breakdown.insert("cgst".into(), tax(80));
            f.tax_breakdown.insert("sgst".into(), tax(80));
        }
        if let PageContent::Invoice(f) = &mut p2.content {
            f.tax_breakdown.insert("cgst".into(), tax(90));
            f.tax_breakdown.insert("igst".into(), TaxEntry::default());
        }
        let out = merge_pages(vec![p1, p2]);
        let taxes = &out.groups[0].fields.tax_breakdown;
        let codes: Vec<&str> = taxes.keys().map(String::as_str).collect();
        assert_eq!(codes, vec!["cgst", "sgst", "igst"]);
        assert_eq!(taxes["cgst"].amount, Some(Amount::from(90_i64)));
    }

    #[test]
    fn identity_fields_come_from_first_page() {
        let mut p1 = page(1, "INV-1", vec![], 0);
        let mut p2 = page(2, "INV-1", vec![], 0);
        if let PageContent::Invoice(f) = &mut p1.content {
            f.buyer_name = "First Buyer".into();
        }
        if let PageContent::Invoice(f) = &mut p2.content {
            f.buyer_name = "Second Buyer".into();
        }
        let out = merge_pages(vec![p2, p1]);
        assert_eq!(out.groups[0].fields.buyer_name, "First Buyer");
    }

    #[test]
    fn non_invoice_pages_never_reach_groups() {
        let out = merge_pages(vec![
            PageResult::non_invoice(1),
            page(2, "INV-9", vec![], 10),
            PageResult::non_invoice(3),
        ]);
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].source_pages, vec![2]);
    }

    #[test]
    fn groups_come_out_in_first_seen_order() {
        let out = merge_pages(vec![
            page(1, "B", vec![], 1),
            page(2, "A", vec![], 1),
            page(3, "B", vec![], 1),
        ]);
        let nums: Vec<&str> = out.groups.iter().map(|g| g.fields.invoice_num.as_str()).collect();
        assert_eq!(nums, vec!["B", "A"]);
        assert_eq!(out.groups[0].source_pages, vec![1, 3]);
    }

    #[test]
    fn blank_keys_share_a_group() {
        let out = merge_pages(vec![
            PageResult::invoice(1, InvoiceFields::default()),
            PageResult::invoice(2, InvoiceFields::default()),
        ]);
        assert_eq!(out.groups.len(), 1);
    }
}
