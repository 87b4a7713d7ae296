//! Dedup: drop invoices that were extracted more than once.
//!
//! The key is the merge key plus `total`. Two different invoices can share a
//! number, vendor and date; requiring the same total as well keeps those
//! apart. The first invoice per key is kept and order is preserved, so
//! running dedup on its own output changes nothing.

use crate::error::Diagnostic;
use crate::invoice::{DedupKey, DeduplicatedInvoice, LogicalInvoice};
use std::collections::HashSet;
use tracing::info;

/// Result of [`dedup_invoices`].
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    pub invoices: Vec<DeduplicatedInvoice>,
    /// How many invoices were dropped.
    pub duplicates: usize,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn dedup_invoices(groups: Vec<LogicalInvoice>) -> DedupOutcome {
    let mut seen: HashSet<DedupKey> = HashSet::with_capacity(groups.len());
    let mut invoices = Vec::with_capacity(groups.len());
    let mut diagnostics = Vec::new();

    for group in groups {
        if seen.insert(group.dedup_key()) {
            invoices.push(group);
        } else {
            info!(
                "Duplicate removed: invoice {:?} from {:?} (pages {:?})",
                group.fields.invoice_num, group.fields.vendor_name, group.source_pages
            );
            diagnostics.push(Diagnostic::DuplicateRemoved {
                invoice_num: group.fields.invoice_num,
                vendor_name: group.fields.vendor_name,
            });
        }
    }

    let duplicates = diagnostics.len();
    if duplicates > 0 {
        info!("Total duplicates removed: {}", duplicates);
    }

    DedupOutcome {
        invoices,
        duplicates,
        diagnostics,
    }
}
