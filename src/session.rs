// src/session.rs

use crate::error::{InvoiceError, Result};
use crate::heuristics::InvoiceType;
use crate::schema::{ConfidenceScores, InvoiceData};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

/// An extracted invoice kept in the session batch.
#[derive(Debug, Clone)]
pub struct ProcessedInvoice {
    pub id: Uuid,
    pub source: String,
    pub invoice: InvoiceData,
    pub confidence_scores: ConfidenceScores,
    pub invoice_type: InvoiceType,
    pub processed_at: OffsetDateTime,
}

/// Confidence below this is called out when records are listed.
pub const LOW_CONFIDENCE: f64 = 0.7;

/// Row shown to the user when reviewing and editing the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRow {
    pub id: Uuid,
    pub invoice_number: Option<String>,
    pub total_amount: Option<f64>,
    pub tax: Option<f64>,
    pub invoice_date: Option<String>,
    pub invoice_type: InvoiceType,
    pub confidence_invoice_number: f64,
    pub confidence_total_amount: f64,
    pub confidence_tax: f64,
}

impl ReviewRow {
    pub fn has_low_confidence(&self) -> bool {
        [
            self.confidence_invoice_number,
            self.confidence_total_amount,
            self.confidence_tax,
        ]
        .iter()
        .any(|&c| c < LOW_CONFIDENCE)
    }
}

/// Fields that can be edited one at a time from the review table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditableField {
    InvoiceNumber,
    TotalAmount,
    Tax,
    InvoiceDate,
}

impl std::str::FromStr for EditableField {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "invoice_number" => Ok(EditableField::InvoiceNumber),
            "total_amount" => Ok(EditableField::TotalAmount),
            "tax" => Ok(EditableField::Tax),
            "invoice_date" => Ok(EditableField::InvoiceDate),
            other => Err(InvoiceError::Validation(format!(
                "'{other}' is not editable (use invoice_number, total_amount, tax or invoice_date)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

/// Everything that lives for one user session: the processed batch and the
/// chat log. The interactive loop owns it and is its only writer.
#[derive(Debug, Default)]
pub struct Session {
    invoices: Vec<ProcessedInvoice>,
    chat_history: Vec<ChatTurn>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all records and chat history.
    pub fn reset(&mut self) {
        info!(
            invoices = self.invoices.len(),
            chats = self.chat_history.len(),
            "Session reset"
        );
        self.invoices.clear();
        self.chat_history.clear();
    }

    /// Append a freshly extracted record and return its new id.
    pub fn add(
        &mut self,
        source: impl Into<String>,
        invoice: InvoiceData,
        confidence_scores: ConfidenceScores,
        invoice_type: InvoiceType,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let source = source.into();
        info!(%id, source = %source, invoice_type = %invoice_type, "Invoice added to session");
        self.invoices.push(ProcessedInvoice {
            id,
            source,
            invoice,
            confidence_scores,
            invoice_type,
            processed_at: OffsetDateTime::now_utc(),
        });
        id
    }

    pub fn invoices(&self) -> &[ProcessedInvoice] {
        &self.invoices
    }

    pub fn len(&self) -> usize {
        self.invoices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&ProcessedInvoice> {
        self.invoices.iter().find(|inv| inv.id == id)
    }

    /// Find a record by full id or by a unique id prefix.
    pub fn resolve_id(&self, prefix: &str) -> Result<Uuid> {
        let prefix = prefix.trim().to_ascii_lowercase();
        let matches: Vec<Uuid> = self
            .invoices
            .iter()
            .map(|inv| inv.id)
            .filter(|id| !prefix.is_empty() && id.to_string().starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(InvoiceError::Validation(format!("no invoice with id '{prefix}'"))),
            _ => Err(InvoiceError::Validation(format!("id prefix '{prefix}' is ambiguous"))),
        }
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut ProcessedInvoice> {
        self.invoices
            .iter_mut()
            .find(|inv| inv.id == id)
            .ok_or_else(|| InvoiceError::Validation(format!("no invoice with id '{id}'")))
    }

    /// Edit one field. The value is validated before anything is written.
    pub fn edit_field(&mut self, id: Uuid, field: EditableField, value: &str) -> Result<()> {
        let value = value.trim();
        let record = self.get_mut(id)?;
        let mut edited = record.invoice.clone();
        match field {
            EditableField::InvoiceNumber => edited.invoice_number = non_empty(value),
            EditableField::InvoiceDate => edited.invoice_date = non_empty(value),
            EditableField::TotalAmount => edited.total_amount = parse_amount("total_amount", value)?,
            EditableField::Tax => edited.tax = parse_amount("tax", value)?,
        }
        if edited.is_empty() {
            return Err(InvoiceError::Validation("edited invoice has no data".to_string()));
        }
        record.invoice = edited;
        info!(%id, field = ?field, "Invoice field updated");
        Ok(())
    }

    /// Replace a whole record from a JSON document. On any error the previous
    /// record stays as it was.
    pub fn replace_invoice(&mut self, id: Uuid, json: &str) -> Result<()> {
        let invoice: InvoiceData = serde_json::from_str(json)
            .map_err(|e| InvoiceError::Validation(format!("edited invoice is invalid: {e}")))?;
        if invoice.is_empty() {
            return Err(InvoiceError::Validation("edited invoice has no data".to_string()));
        }
        validate_amounts(&invoice)?;
        let record = self.get_mut(id)?;
        record.invoice = invoice;
        info!(%id, "Invoice replaced");
        Ok(())
    }

    pub fn review_rows(&self) -> Vec<ReviewRow> {
        self.invoices
            .iter()
            .map(|inv| ReviewRow {
                id: inv.id,
                invoice_number: inv.invoice.invoice_number.clone(),
                total_amount: inv.invoice.total_amount,
                tax: inv.invoice.tax,
                invoice_date: inv.invoice.invoice_date.clone(),
                invoice_type: inv.invoice_type,
                confidence_invoice_number: inv.confidence_scores.display("invoice_number"),
                confidence_total_amount: inv.confidence_scores.display("total_amount"),
                confidence_tax: inv.confidence_scores.display("tax"),
            })
            .collect()
    }

    /// The batch as pretty JSON, for chat context and export.
    pub fn invoice_context(&self) -> Result<String> {
        let invoices: Vec<&InvoiceData> = self.invoices.iter().map(|inv| &inv.invoice).collect();
        serde_json::to_string_pretty(&invoices).map_err(|e| InvoiceError::Export(e.to_string()))
    }

    pub fn record_chat(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.chat_history.push(ChatTurn {
            question: question.into(),
            answer: answer.into(),
        });
    }

    pub fn chat_history(&self) -> &[ChatTurn] {
        &self.chat_history
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_amount(field: &str, value: &str) -> Result<Option<f64>> {
    if value.is_empty() {
        return Ok(None);
    }
    let amount: f64 = value
        .parse()
        .map_err(|_| InvoiceError::Validation(format!("{field} must be a number, got '{value}'")))?;
    if !amount.is_finite() {
        return Err(InvoiceError::Validation(format!("{field} must be finite")));
    }
    Ok(Some(amount))
}

fn validate_amounts(invoice: &InvoiceData) -> Result<()> {
    let scalars = [
        ("subtotal", invoice.subtotal),
        ("tax", invoice.tax),
        ("total_amount", invoice.total_amount),
    ];
    let items = invoice.line_items().iter().flat_map(|item| {
        [
            ("quantity", item.quantity),
            ("unit_price", item.unit_price),
            ("total_price", item.total_price),
        ]
    });
    for (field, value) in scalars.into_iter().chain(items) {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(InvoiceError::Validation(format!("{field} must be finite")));
        }
    }
    Ok(())
}
