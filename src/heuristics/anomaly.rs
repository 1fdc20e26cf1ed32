use crate::session::ProcessedInvoice;
use serde::Serialize;
use uuid::Uuid;

/// Records further than this many standard deviations from the mean are flagged.
pub const Z_SCORE_THRESHOLD: f64 = 2.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub invoice_number: Option<String>,
    pub total_amount: f64,
    pub currency: Option<String>,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AnomalyReport {
    /// No record carries a total amount.
    NoTotals,
    /// Fewer than two totals; nothing to compare against.
    InsufficientData { samples: usize },
    /// Totals were analyzed. Empty when nothing stood out.
    Analyzed {
        mean: f64,
        std_dev: f64,
        anomalies: Vec<Anomaly>,
    },
}

pub fn detect_anomalies(invoices: &[ProcessedInvoice]) -> AnomalyReport {
    detect_anomalies_with_threshold(invoices, Z_SCORE_THRESHOLD)
}

/// Z-score outlier detection over `total_amount`, using the sample standard
/// deviation. Records without a total are ignored.
pub fn detect_anomalies_with_threshold(invoices: &[ProcessedInvoice], threshold: f64) -> AnomalyReport {
    let totals: Vec<(&ProcessedInvoice, f64)> = invoices
        .iter()
        .filter_map(|inv| inv.invoice.total_amount.map(|t| (inv, t)))
        .collect();

    match totals.len() {
        0 => return AnomalyReport::NoTotals,
        n if n < 2 => return AnomalyReport::InsufficientData { samples: n },
        _ => {}
    }

    let n = totals.len() as f64;
    let mean = totals.iter().map(|(_, t)| t).sum::<f64>() / n;
    let variance = totals.iter().map(|(_, t)| (t - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    // Identical totals: nothing deviates.
    if std_dev == 0.0 || !std_dev.is_finite() {
        return AnomalyReport::Analyzed {
            mean,
            std_dev,
            anomalies: Vec::new(),
        };
    }

    let anomalies = totals
        .into_iter()
        .filter_map(|(inv, total)| {
            let z_score = (total - mean) / std_dev;
            (z_score.abs() > threshold).then(|| Anomaly {
                id: inv.id,
                invoice_number: inv.invoice.invoice_number.clone(),
                total_amount: total,
                currency: inv.invoice.currency.clone(),
                z_score,
            })
        })
        .collect();

    AnomalyReport::Analyzed {
        mean,
        std_dev,
        anomalies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::test_support::batch_with_totals;

    fn flagged(report: &AnomalyReport) -> Vec<f64> {
        match report {
            AnomalyReport::Analyzed { anomalies, .. } => {
                anomalies.iter().map(|a| a.total_amount).collect()
            }
            other => panic!("expected analysis, got {other:?}"),
        }
    }

    #[test]
    fn test_single_outlier_is_flagged() {
        let mut totals = vec![Some(100.0); 9];
        totals.push(Some(10000.0));
        let report = detect_anomalies(&batch_with_totals(&totals));
        assert_eq!(flagged(&report), vec![10000.0]);
    }

    #[test]
    fn test_five_records_cannot_reach_threshold() {
        // With n samples, |z| is bounded by (n - 1) / sqrt(n): 1.79 for n = 5.
        let totals = [100.0, 100.0, 100.0, 100.0, 10000.0].map(Some);
        let report = detect_anomalies(&batch_with_totals(&totals));
        assert!(flagged(&report).is_empty());

        let report = detect_anomalies_with_threshold(&batch_with_totals(&totals), 1.5);
        assert_eq!(flagged(&report), vec![10000.0]);
    }

    #[test]
    fn test_zero_variance_flags_nothing() {
        let report = detect_anomalies(&batch_with_totals(&[Some(50.0), Some(50.0), Some(50.0)]));
        match report {
            AnomalyReport::Analyzed { std_dev, anomalies, .. } => {
                assert_eq!(std_dev, 0.0);
                assert!(anomalies.is_empty());
            }
            other => panic!("expected analysis, got {other:?}"),
        }
    }

    #[test]
    fn test_one_total_is_insufficient() {
        let report = detect_anomalies(&batch_with_totals(&[Some(10.0), None, None]));
        assert_eq!(report, AnomalyReport::InsufficientData { samples: 1 });
    }

    #[test]
    fn test_no_totals() {
        assert_eq!(detect_anomalies(&batch_with_totals(&[None])), AnomalyReport::NoTotals);
        assert_eq!(detect_anomalies(&[]), AnomalyReport::NoTotals);
    }
}
