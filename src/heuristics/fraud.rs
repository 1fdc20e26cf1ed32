use crate::session::ProcessedInvoice;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Totals above this are flagged regardless of currency.
pub const HIGH_TOTAL_LIMIT: f64 = 100_000.0;
/// Tax above this share of the total is flagged.
pub const TAX_RATIO_LIMIT: f64 = 0.3;

pub const FLAG_DUPLICATE: &str = "Duplicate invoice number detected.";
pub const FLAG_HIGH_TOTAL: &str = "Unusually high total amount.";
pub const FLAG_HIGH_TAX: &str = "Unusually high tax amount.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudAlert {
    pub id: Uuid,
    pub invoice_number: Option<String>,
    pub total_amount: Option<f64>,
    pub tax: Option<f64>,
    pub flags: Vec<&'static str>,
}

impl FraudAlert {
    /// All triggered flags as one line.
    pub fn message(&self) -> String {
        self.flags.join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FraudReport {
    NothingToAnalyze,
    Clear,
    Alerts(Vec<FraudAlert>),
}

/// Apply the duplicate-number, high-total and tax-ratio rules to every record.
pub fn detect_fraud(invoices: &[ProcessedInvoice]) -> FraudReport {
    if invoices.is_empty() {
        return FraudReport::NothingToAnalyze;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for number in invoices.iter().filter_map(|inv| inv.invoice.invoice_number.as_deref()) {
        *counts.entry(number).or_default() += 1;
    }

    let alerts: Vec<FraudAlert> = invoices
        .iter()
        .filter_map(|inv| {
            let invoice = &inv.invoice;
            let mut flags = Vec::new();

            if invoice
                .invoice_number
                .as_deref()
                .is_some_and(|n| counts.get(n).copied().unwrap_or_default() > 1)
            {
                flags.push(FLAG_DUPLICATE);
            }
            if invoice.total_amount.is_some_and(|t| t > HIGH_TOTAL_LIMIT) {
                flags.push(FLAG_HIGH_TOTAL);
            }
            if let (Some(tax), Some(total)) = (invoice.tax, invoice.total_amount) {
                if tax > TAX_RATIO_LIMIT * total {
                    flags.push(FLAG_HIGH_TAX);
                }
            }

            (!flags.is_empty()).then(|| FraudAlert {
                id: inv.id,
                invoice_number: invoice.invoice_number.clone(),
                total_amount: invoice.total_amount,
                tax: invoice.tax,
                flags,
            })
        })
        .collect();

    if alerts.is_empty() {
        FraudReport::Clear
    } else {
        FraudReport::Alerts(alerts)
    }
}
