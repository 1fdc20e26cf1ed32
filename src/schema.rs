// src/schema.rs

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// A single invoice line item. Nothing ties `total_price` to
/// `quantity * unit_price`; invoices in the wild disagree with themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_price: Option<f64>,
}

/// All structured data we extract from an invoice image. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoice_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoice_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub billing_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub shipping_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub vendor_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub line_items: Option<Vec<LineItem>>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub subtotal: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub tax: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub currency: Option<String>,
}

/// Field names and descriptions of `InvoiceData`, in declaration order.
pub const INVOICE_FIELDS: &[(&str, &str)] = &[
    ("invoice_number", "The unique identifier or reference number of the invoice."),
    ("invoice_date", "The date when the invoice was issued."),
    ("due_date", "The payment due date."),
    ("billing_address", "The address of the customer who is being billed."),
    ("shipping_address", "The address where the goods/services are to be delivered."),
    ("vendor_name", "The name of the company or individual issuing the invoice."),
    ("customer_name", "The name of the person or organization being billed."),
    ("line_items", "A list of items described in the invoice."),
    ("subtotal", "The sum of all line item totals before taxes or additional fees."),
    ("tax", "The tax amount applied to the subtotal."),
    ("total_amount", "The final total to be paid including subtotal and taxes."),
    ("currency", "The currency in which the invoice is issued (e.g., USD, EUR)."),
];

const LINE_ITEM_FIELDS: &[(&str, &str)] = &[
    ("description", "A brief description of the product or service provided."),
    ("quantity", "The number of units of the product or service."),
    ("unit_price", "The price per unit of the product or service."),
    ("total_price", "The total price for the line item, calculated as quantity × unit price."),
];

impl InvoiceData {
    /// True when no field at all was populated.
    pub fn is_empty(&self) -> bool {
        self.coverage().0 == 0 && self.line_items.is_none()
    }

    /// How many scalar fields were extracted, out of how many.
    pub fn coverage(&self) -> (usize, usize) {
        let filled = [
            self.invoice_number.is_some(),
            self.invoice_date.is_some(),
            self.due_date.is_some(),
            self.billing_address.is_some(),
            self.shipping_address.is_some(),
            self.vendor_name.is_some(),
            self.customer_name.is_some(),
            self.subtotal.is_some(),
            self.tax.is_some(),
            self.total_amount.is_some(),
            self.currency.is_some(),
        ];
        (filled.iter().filter(|&&v| v).count(), filled.len())
    }

    pub fn line_items(&self) -> &[LineItem] {
        self.line_items.as_deref().unwrap_or_default()
    }

    /// Machine-readable contract describing every field, embedded in the extraction prompt.
    pub fn json_schema() -> Value {
        json!({
            "title": "InvoiceData",
            "type": "object",
            "properties": properties(INVOICE_FIELDS),
            "$defs": {
                "LineItem": {
                    "title": "LineItem",
                    "type": "object",
                    "properties": properties(LINE_ITEM_FIELDS),
                }
            }
        })
    }
}

fn properties(fields: &[(&str, &str)]) -> Value {
    let mut props = Map::new();
    for (name, description) in fields {
        let ty = match *name {
            "line_items" => json!({"anyOf": [{"type": "array", "items": {"$ref": "#/$defs/LineItem"}}, {"type": "null"}]}),
            "quantity" | "unit_price" | "total_price" | "subtotal" | "tax" | "total_amount" => {
                json!({"anyOf": [{"type": "number"}, {"type": "null"}]})
            }
            _ => json!({"anyOf": [{"type": "string"}, {"type": "null"}]}),
        };
        let mut prop = ty;
        prop["description"] = Value::from(*description);
        prop["default"] = Value::Null;
        props.insert((*name).to_string(), prop);
    }
    Value::Object(props)
}

/// True when every value in a raw `data` object is null (or there are none).
///
/// Checked on the raw map so that a field dropped during typed parsing can
/// never hide a reply that was empty to begin with.
pub fn all_fields_null(data: &Map<String, Value>) -> bool {
    data.values().all(Value::is_null)
}

/// Per-field model confidence in [0, 1]. Sparse: fields the model did not
/// score are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfidenceScores(BTreeMap<String, f64>);

impl ConfidenceScores {
    /// Build from a raw JSON object, skipping nulls and clamping to [0, 1].
    pub fn from_json(raw: &Map<String, Value>) -> Result<Self, String> {
        let mut scores = BTreeMap::new();
        for (field, value) in raw {
            match value {
                Value::Null => continue,
                Value::Number(n) => {
                    let score = n
                        .as_f64()
                        .ok_or_else(|| format!("confidence for '{field}' is not a float"))?;
                    scores.insert(field.clone(), score.clamp(0.0, 1.0));
                }
                other => {
                    return Err(format!(
                        "confidence for '{field}' must be a number, got {other}"
                    ));
                }
            }
        }
        Ok(Self(scores))
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.0.get(field).copied()
    }

    /// Display value: unscored fields read as full confidence.
    pub fn display(&self, field: &str) -> f64 {
        self.get(field).unwrap_or(1.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Accept a JSON number or a numeric string ("12.50") for a numeric field.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let amount = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom("number out of range"))?,
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("expected a number, got \"{s}\"")))?,
        Some(other) => return Err(D::Error::custom(format!("expected a number, got {other}"))),
    };
    if !amount.is_finite() {
        return Err(D::Error::custom(format!("amount must be finite, got {amount}")));
    }
    Ok(Some(amount))
}

/// Accept a JSON string, or a bare number for fields like invoice numbers.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected a string, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_fields_omitted_is_empty() {
        let invoice: InvoiceData = serde_json::from_str("{}").unwrap();
        assert!(invoice.is_empty());
        assert_eq!(invoice.coverage(), (0, 11));
        assert_eq!(invoice, InvoiceData::default());
    }

    #[test]
    fn test_partial_record_is_not_empty() {
        let invoice: InvoiceData =
            serde_json::from_str(r#"{"vendor_name": "Acme", "total_amount": null}"#).unwrap();
        assert!(!invoice.is_empty());
        assert_eq!(invoice.vendor_name.as_deref(), Some("Acme"));
        assert_eq!(invoice.total_amount, None);
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let invoice: InvoiceData = serde_json::from_str(
            r#"{"invoice_number": 1042, "total_amount": "199.90",
                "line_items": [{"description": "Widget", "quantity": "2", "total_price": 10}]}"#,
        )
        .unwrap();
        assert_eq!(invoice.invoice_number.as_deref(), Some("1042"));
        assert_eq!(invoice.total_amount, Some(199.9));
        assert_eq!(invoice.line_items()[0].quantity, Some(2.0));
        assert_eq!(invoice.line_items()[0].unit_price, None);
    }

    #[test]
    fn test_non_numeric_total_is_rejected() {
        let parsed = serde_json::from_str::<InvoiceData>(r#"{"total_amount": "lots"}"#);
        assert!(parsed.is_err());
        let parsed = serde_json::from_str::<InvoiceData>(r#"{"tax": [1, 2]}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_non_finite_amount_is_rejected() {
        for raw in [
            r#"{"total_amount": "Infinity"}"#,
            r#"{"tax": "inf"}"#,
            r#"{"subtotal": "NaN"}"#,
            r#"{"line_items": [{"unit_price": "-inf"}]}"#,
        ] {
            assert!(serde_json::from_str::<InvoiceData>(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn test_all_fields_null_on_raw_map() {
        let raw: Value = serde_json::from_str(r#"{"invoice_number": null, "tax": null}"#).unwrap();
        assert!(all_fields_null(raw.as_object().unwrap()));

        let raw: Value = serde_json::from_str(r#"{"invoice_number": null, "tax": 0}"#).unwrap();
        assert!(!all_fields_null(raw.as_object().unwrap()));

        assert!(all_fields_null(&Map::new()));
    }

    #[test]
    fn test_schema_lists_every_field() {
        let schema = InvoiceData::json_schema();
        let props = schema["properties"].as_object().unwrap();
        assert_eq!(props.len(), INVOICE_FIELDS.len());
        assert!(props["total_amount"]["description"].as_str().unwrap().contains("final total"));
        assert!(schema["$defs"]["LineItem"]["properties"]["unit_price"].is_object());
    }

    #[test]
    fn test_confidence_scores_are_sparse_and_clamped() {
        let raw: Value = serde_json::from_str(
            r#"{"invoice_number": 0.95, "tax": 1.7, "due_date": null}"#,
        )
        .unwrap();
        let scores = ConfidenceScores::from_json(raw.as_object().unwrap()).unwrap();
        assert_eq!(scores.get("invoice_number"), Some(0.95));
        assert_eq!(scores.get("tax"), Some(1.0));
        assert_eq!(scores.get("due_date"), None);
        assert_eq!(scores.display("due_date"), 1.0);

        let bad: Value = serde_json::from_str(r#"{"tax": "high"}"#).unwrap();
        assert!(ConfidenceScores::from_json(bad.as_object().unwrap()).is_err());
    }
}
