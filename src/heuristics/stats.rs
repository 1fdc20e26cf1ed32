use crate::session::ProcessedInvoice;
use serde::Serialize;
use std::collections::BTreeMap;

/// How much of the batch came out usable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatus {
    pub total: usize,
    /// Records that carry an invoice number.
    pub successful: usize,
    pub success_rate: f64,
}

pub fn batch_status(invoices: &[ProcessedInvoice]) -> BatchStatus {
    let total = invoices.len();
    let successful = invoices
        .iter()
        .filter(|inv| inv.invoice.invoice_number.is_some())
        .count();
    let success_rate = if total > 0 {
        successful as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    BatchStatus {
        total,
        successful,
        success_rate,
    }
}

/// Distribution of totals and currencies across the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub with_totals: usize,
    pub min_total: Option<f64>,
    pub mean_total: Option<f64>,
    pub max_total: Option<f64>,
    pub currencies: BTreeMap<String, usize>,
}

pub fn batch_summary(invoices: &[ProcessedInvoice]) -> BatchSummary {
    let totals: Vec<f64> = invoices
        .iter()
        .filter_map(|inv| inv.invoice.total_amount)
        .collect();

    let mut currencies = BTreeMap::new();
    for code in invoices.iter().filter_map(|inv| inv.invoice.currency.as_deref()) {
        *currencies.entry(code.trim().to_uppercase()).or_insert(0) += 1;
    }

    BatchSummary {
        with_totals: totals.len(),
        min_total: totals.iter().copied().reduce(f64::min),
        mean_total: (!totals.is_empty()).then(|| totals.iter().sum::<f64>() / totals.len() as f64),
        max_total: totals.iter().copied().reduce(f64::max),
        currencies,
    }
}
