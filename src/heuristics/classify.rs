use crate::schema::InvoiceData;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceType {
    Retail,
    Service,
    Utility,
    General,
}

/// Keyword sets, checked in this order. First hit wins.
const KEYWORDS: &[(InvoiceType, &[&str])] = &[
    (InvoiceType::Retail, &["store", "shop", "mart", "sku", "product"]),
    (
        InvoiceType::Service,
        &["consulting", "service", "hours", "labor", "professional"],
    ),
    (
        InvoiceType::Utility,
        &["electricity", "water", "gas", "bill", "utility"],
    ),
];

impl InvoiceType {
    /// Extra prompt instructions for the second, type-aware extraction pass.
    pub fn prompt_hint(self) -> &'static str {
        match self {
            InvoiceType::Retail => "Focus on product SKUs, quantities, and unit prices in line items.",
            InvoiceType::Service => {
                "Emphasize service descriptions, hours worked, and rates in line items."
            }
            InvoiceType::Utility => {
                "Prioritize billing periods, meter readings, and rate structures."
            }
            InvoiceType::General => "Extract all fields as per the schema.",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceType::Retail => "retail",
            InvoiceType::Service => "service",
            InvoiceType::Utility => "utility",
            InvoiceType::General => "general",
        }
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guess the invoice type from the vendor name and line-item descriptions.
pub fn classify(data: &InvoiceData) -> InvoiceType {
    let vendor = data.vendor_name.as_deref().unwrap_or_default().to_lowercase();
    let descriptions: Vec<String> = data
        .line_items()
        .iter()
        .map(|item| item.description.as_deref().unwrap_or_default().to_lowercase())
        .collect();

    KEYWORDS
        .iter()
        .find(|(_, kws)| {
            kws.iter()
                .any(|kw| vendor.contains(kw) || descriptions.iter().any(|d| d.contains(kw)))
        })
        .map(|(ty, _)| *ty)
        .unwrap_or(InvoiceType::General)
}
