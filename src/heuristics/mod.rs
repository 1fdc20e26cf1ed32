// src/heuristics/mod.rs

//! Rule-based checks that run on extracted records: invoice type guessing
//! and batch-level anomaly and fraud screening.

mod anomaly;
mod classify;
mod fraud;
mod stats;

pub use anomaly::{AnomalyReport, Z_SCORE_THRESHOLD, detect_anomalies};
pub use classify::{InvoiceType, classify};
pub use fraud::{FraudReport, detect_fraud};
pub use stats::{batch_status, batch_summary};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::heuristics::InvoiceType;
    use crate::schema::{ConfidenceScores, InvoiceData};
    use crate::session::ProcessedInvoice;
    use time::OffsetDateTime;
    use uuid::Uuid;

    pub(crate) fn record(invoice: InvoiceData) -> ProcessedInvoice {
        ProcessedInvoice {
            id: Uuid::new_v4(),
            source: "test.png".to_string(),
            invoice,
            confidence_scores: ConfidenceScores::default(),
            invoice_type: InvoiceType::General,
            processed_at: OffsetDateTime::now_utc(),
        }
    }

    pub(crate) fn batch_with_totals(totals: &[Option<f64>]) -> Vec<ProcessedInvoice> {
        totals
            .iter()
            .map(|&total_amount| {
                record(InvoiceData {
                    total_amount,
                    ..Default::default()
                })
            })
            .collect()
    }
}
