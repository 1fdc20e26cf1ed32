// src/export.rs

use crate::error::{InvoiceError, Result};
use crate::schema::InvoiceData;
use csv::WriterBuilder;

/// At most this many line items get their own column group.
pub const MAX_CSV_LINE_ITEMS: usize = 10;

const BASE_COLUMNS: &[&str] = &[
    "invoice_number",
    "invoice_date",
    "due_date",
    "billing_address",
    "shipping_address",
    "vendor_name",
    "customer_name",
    "subtotal",
    "tax",
    "total_amount",
    "currency",
];

const LINE_ITEM_COLUMNS: &[&str] = &["description", "quantity", "unit_price", "total_price"];

/// One row per invoice; line items flattened into numbered column groups.
pub fn export_to_csv(invoices: &[&InvoiceData]) -> Result<String> {
    let item_groups = invoices
        .iter()
        .map(|inv| inv.line_items().len())
        .max()
        .unwrap_or(0)
        .min(MAX_CSV_LINE_ITEMS);

    let mut header: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    for i in 1..=item_groups {
        header.extend(LINE_ITEM_COLUMNS.iter().map(|c| format!("line_item_{i}_{c}")));
    }

    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(&header)?;

    for inv in invoices {
        let mut row = vec![
            text(&inv.invoice_number),
            text(&inv.invoice_date),
            text(&inv.due_date),
            text(&inv.billing_address),
            text(&inv.shipping_address),
            text(&inv.vendor_name),
            text(&inv.customer_name),
            number(inv.subtotal),
            number(inv.tax),
            number(inv.total_amount),
            text(&inv.currency),
        ];
        let items = inv.line_items();
        for i in 0..item_groups {
            match items.get(i) {
                Some(item) => row.extend([
                    text(&item.description),
                    number(item.quantity),
                    number(item.unit_price),
                    number(item.total_price),
                ]),
                None => row.extend(std::iter::repeat_n(String::new(), LINE_ITEM_COLUMNS.len())),
            }
        }
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| InvoiceError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| InvoiceError::Export(e.to_string()))
}

/// Pretty JSON array of full invoices, line items nested.
pub fn export_to_json(invoices: &[&InvoiceData]) -> Result<String> {
    serde_json::to_string_pretty(invoices).map_err(|e| InvoiceError::Export(e.to_string()))
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LineItem;

    fn item(description: &str, total: f64) -> LineItem {
        LineItem {
            description: Some(description.to_string()),
            quantity: Some(1.0),
            unit_price: Some(total),
            total_price: Some(total),
        }
    }

    #[test]
    fn test_empty_export_is_header_only() {
        let csv = export_to_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(csv.starts_with("invoice_number,invoice_date,"));
        assert!(!csv.contains("line_item_"));
    }

    #[test]
    fn test_rows_and_line_item_groups() {
        let a = InvoiceData {
            invoice_number: Some("A1".into()),
            vendor_name: Some("Shop, Inc".into()),
            total_amount: Some(12.5),
            line_items: Some(vec![item("Pen", 2.5), item("Paper", 10.0)]),
            ..Default::default()
        };
        let b = InvoiceData {
            invoice_number: Some("B2".into()),
            ..Default::default()
        };
        let csv = export_to_csv(&[&a, &b]).unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 11 + 8);
        assert_eq!(&headers[11], "line_item_1_description");
        assert_eq!(&headers[18], "line_item_2_total_price");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][5], "Shop, Inc");
        assert_eq!(&rows[0][9], "12.5");
        assert_eq!(&rows[0][15], "Paper");
        assert_eq!(&rows[1][0], "B2");
        assert_eq!(&rows[1][11], "");
    }

    #[test]
    fn test_line_items_capped_at_ten_groups() {
        let many = InvoiceData {
            line_items: Some((0..12).map(|i| item(&format!("item {i}"), 1.0)).collect()),
            ..Default::default()
        };
        let csv = export_to_csv(&[&many]).unwrap();
        let header = csv.lines().next().unwrap();
        assert!(header.contains("line_item_10_total_price"));
        assert!(!header.contains("line_item_11_"));
    }

    #[test]
    fn test_json_export_keeps_nesting() {
        let a = InvoiceData {
            line_items: Some(vec![item("Pen", 2.5)]),
            ..Default::default()
        };
        let json = export_to_json(&[&a]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["line_items"][0]["description"], "Pen");
        assert!(parsed[0]["invoice_number"].is_null());
        assert_eq!(export_to_json(&[]).unwrap(), "[]");
    }
}
