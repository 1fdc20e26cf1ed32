// src/repl.rs

use crate::batch::{ImageOutcome, process_batch};
use crate::config::Config;
use crate::error::{InvoiceError, Result};
use crate::export::{export_to_csv, export_to_json};
use crate::heuristics::{
    AnomalyReport, FraudReport, Z_SCORE_THRESHOLD, batch_status, batch_summary, detect_anomalies,
    detect_fraud,
};
use crate::image::{ImageContent, ImageInput, fetch_image, is_url, load_image_file};
use crate::llm_extract::{LlmClient, build_chat_prompt};
use crate::schema::InvoiceData;
use crate::session::{EditableField, LOW_CONFIDENCE, Session};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

pub const QUICK_QUESTIONS: &[&str] = &[
    "Summarize the latest invoice",
    "Check for missing fields in invoices",
    "List all vendors",
    "What is the total amount of all invoices?",
];

const HELP: &str = "\
commands:
  add <path|url> [--inline]     queue an image (--inline downloads a URL first)
  process                       extract all queued images
  list                          review extracted invoices
  show <id>                     full record and confidence scores
  edit <id> <field> <value>     field: invoice_number, total_amount, tax, invoice_date
  replace <id> <file.json>      replace a whole record
  anomalies | fraud | stats | status
  ask <question> | ask #<n>     question about the batch (#1-#4: quick questions)
  history                       chat history
  export csv|json <path>
  reset                         clear the session
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add { source: String, inline: bool },
    Process,
    List,
    Show(String),
    Edit { id: String, field: EditableField, value: String },
    Replace { id: String, path: PathBuf },
    Anomalies,
    Fraud,
    Stats,
    Status,
    Ask(String),
    History,
    Export { format: ExportFormat, path: PathBuf },
    Reset,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

fn usage(msg: &str) -> InvoiceError {
    InvoiceError::Validation(format!("usage: {msg}"))
}

/// Parse one input line. `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match word {
        "" => return Ok(None),
        "add" => match args.as_slice() {
            [source] => Command::Add { source: source.to_string(), inline: false },
            [source, "--inline"] | ["--inline", source] => Command::Add {
                source: source.to_string(),
                inline: true,
            },
            _ => return Err(usage("add <path|url> [--inline]")),
        },
        "process" => Command::Process,
        "list" => Command::List,
        "show" => match args.as_slice() {
            [id] => Command::Show(id.to_string()),
            _ => return Err(usage("show <id>")),
        },
        "edit" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(field), value) if !id.is_empty() => Command::Edit {
                    id: id.to_string(),
                    field: field.parse()?,
                    value: value.unwrap_or_default().trim().to_string(),
                },
                _ => return Err(usage("edit <id> <field> <value>")),
            }
        }
        "replace" => match args.as_slice() {
            [id, path] => Command::Replace { id: id.to_string(), path: PathBuf::from(path) },
            _ => return Err(usage("replace <id> <file.json>")),
        },
        "anomalies" => Command::Anomalies,
        "fraud" => Command::Fraud,
        "stats" => Command::Stats,
        "status" => Command::Status,
        "ask" => {
            if rest.is_empty() {
                return Err(usage("ask <question> | ask #<n>"));
            }
            let question = match rest.strip_prefix('#').and_then(|n| n.parse::<usize>().ok()) {
                Some(n) => QUICK_QUESTIONS
                    .get(n.wrapping_sub(1))
                    .ok_or_else(|| usage("ask #1..#4"))?
                    .to_string(),
                None => rest.to_string(),
            };
            Command::Ask(question)
        }
        "history" => Command::History,
        "export" => match args.as_slice() {
            ["csv", path] => Command::Export { format: ExportFormat::Csv, path: PathBuf::from(path) },
            ["json", path] => Command::Export { format: ExportFormat::Json, path: PathBuf::from(path) },
            _ => return Err(usage("export csv|json <path>")),
        },
        "reset" => Command::Reset,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => {
            return Err(InvoiceError::Validation(format!(
                "unknown command '{other}' (try 'help')"
            )));
        }
    };
    Ok(Some(command))
}

/// Line-oriented front end over a `Session`. It is the only writer to the session.
pub struct Shell<'a> {
    client: &'a LlmClient,
    cfg: &'a Config,
    pending: Vec<ImageInput>,
}

impl<'a> Shell<'a> {
    pub fn new(client: &'a LlmClient, cfg: &'a Config) -> Self {
        Self {
            client,
            cfg,
            pending: Vec::new(),
        }
    }

    /// Read commands from stdin until `quit` or end of input.
    pub async fn run(&mut self, session: &mut Session) -> Result<()> {
        println!("{HELP}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_command(&line) {
                Ok(None) => continue,
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => {
                    if let Err(e) = self.execute(session, command).await {
                        println!("❌ {e}");
                    }
                }
                Err(e) => println!("❌ {e}"),
            }
        }
        info!(invoices = session.len(), "Session ended");
        Ok(())
    }

    pub async fn queue(&mut self, source: &str) {
        if let Err(e) = self.add(source, false).await {
            println!("❌ {source}: {e}");
        }
    }

    async fn add(&mut self, source: &str, inline: bool) -> Result<()> {
        let input = if is_url(source) && inline {
            fetch_image(self.client.http(), source).await?
        } else if is_url(source) {
            ImageInput {
                name: source.to_string(),
                content: ImageContent::Url(source.to_string()),
            }
        } else {
            load_image_file(source)?
        };
        println!("✅ queued {} ({} pending)", input.name, self.pending.len() + 1);
        self.pending.push(input);
        Ok(())
    }

    pub async fn process(&mut self, session: &mut Session) {
        if self.pending.is_empty() {
            println!("nothing queued; use 'add <path|url>' first");
            return;
        }
        let images = std::mem::take(&mut self.pending);
        let outcomes = process_batch(
            session,
            self.client,
            &images,
            &self.cfg.session.language,
            self.cfg.llm.max_retries,
            |done, total, outcome| match outcome {
                ImageOutcome::Added { name, id, invoice_type } => {
                    println!("[{done}/{total}] ✅ {name}: {invoice_type} invoice, id {id}")
                }
                ImageOutcome::Failed { name, error } => {
                    println!("[{done}/{total}] ❌ {name}: {error}")
                }
            },
        )
        .await;
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, ImageOutcome::Failed { .. }))
            .count();
        if failed > 0 {
            error!(failed, total = outcomes.len(), "Some images could not be extracted");
        }
    }

    async fn execute(&mut self, session: &mut Session, command: Command) -> Result<()> {
        match command {
            Command::Add { source, inline } => self.add(&source, inline).await?,
            Command::Process => self.process(session).await,
            Command::List => print_review(session),
            Command::Show(id) => {
                let id = session.resolve_id(&id)?;
                if let Some(record) = session.get(id) {
                    let processed_at = record.processed_at.format(&Rfc3339).unwrap_or_default();
                    println!(
                        "{} ({}, {}, processed {processed_at})",
                        record.id, record.source, record.invoice_type
                    );
                    println!("{}", serde_json::to_string_pretty(&record.invoice)?);
                    if record.confidence_scores.is_empty() {
                        println!("confidence: none reported");
                    } else {
                        println!("confidence: {}", serde_json::to_string(&record.confidence_scores)?);
                    }
                }
            }
            Command::Edit { id, field, value } => {
                let id = session.resolve_id(&id)?;
                session.edit_field(id, field, &value)?;
                println!("✅ Data updated successfully!");
            }
            Command::Replace { id, path } => {
                let id = session.resolve_id(&id)?;
                let json = std::fs::read_to_string(&path)?;
                session.replace_invoice(id, &json)?;
                println!("✅ Data updated successfully!");
            }
            Command::Anomalies => print_anomalies(session),
            Command::Fraud => print_fraud(session),
            Command::Stats => {
                let summary = batch_summary(session.invoices());
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Command::Status => {
                let status = batch_status(session.invoices());
                println!(
                    "Total Invoices: {}\nSuccessfully Processed: {}\nSuccess Rate: {:.1}%\nQueued: {}",
                    status.total,
                    status.successful,
                    status.success_rate,
                    self.pending.len()
                );
            }
            Command::Ask(question) => {
                let prompt = build_chat_prompt(&session.invoice_context()?, &question);
                let answer = self.client.run_chat_query(&prompt).await?;
                println!("{answer}");
                session.record_chat(question, answer);
            }
            Command::History => {
                for (i, turn) in session.chat_history().iter().enumerate() {
                    println!("#{} You: {}\n   Bot: {}", i + 1, turn.question, turn.answer);
                }
            }
            Command::Export { format, path } => {
                let invoices: Vec<&InvoiceData> =
                    session.invoices().iter().map(|inv| &inv.invoice).collect();
                let content = match format {
                    ExportFormat::Csv => export_to_csv(&invoices)?,
                    ExportFormat::Json => export_to_json(&invoices)?,
                };
                std::fs::write(&path, content)?;
                println!("✅ wrote {} invoices to {}", invoices.len(), path.display());
            }
            Command::Reset => {
                session.reset();
                self.pending.clear();
                println!("session cleared");
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }
}

fn fmt_opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_review(session: &Session) {
    if session.is_empty() {
        println!("no invoices processed yet");
        return;
    }
    for row in session.review_rows() {
        let marker = if row.has_low_confidence() { " ⚠️ low confidence" } else { "" };
        println!(
            "{} | {} | total {} | tax {} | {} | {} | conf {:.2}/{:.2}/{:.2}{marker}",
            row.id,
            fmt_opt(&row.invoice_number),
            fmt_opt(&row.total_amount),
            fmt_opt(&row.tax),
            fmt_opt(&row.invoice_date),
            row.invoice_type,
            row.confidence_invoice_number,
            row.confidence_total_amount,
            row.confidence_tax,
        );
    }
    println!("(confidence shown for invoice_number/total_amount/tax; below {LOW_CONFIDENCE} is low)");
}

fn print_anomalies(session: &Session) {
    match detect_anomalies(session.invoices()) {
        AnomalyReport::NoTotals => {
            println!("No total amount data available for anomaly detection.")
        }
        AnomalyReport::InsufficientData { .. } => println!("Not enough data for anomaly detection."),
        AnomalyReport::Analyzed { anomalies, .. } if anomalies.is_empty() => {
            println!("✅ No anomalies detected in total amounts.")
        }
        AnomalyReport::Analyzed { mean, std_dev, anomalies } => {
            println!(
                "⚠️ Potential anomalies detected in total amounts (mean {mean:.2}, std {std_dev:.2}, |z| > {Z_SCORE_THRESHOLD}):"
            );
            for a in anomalies {
                println!(
                    "  {} | {} | {} {} | z {:.2}",
                    a.id,
                    fmt_opt(&a.invoice_number),
                    a.total_amount,
                    fmt_opt(&a.currency),
                    a.z_score
                );
            }
        }
    }
}

fn print_fraud(session: &Session) {
    match detect_fraud(session.invoices()) {
        FraudReport::NothingToAnalyze => println!("No invoices to analyze for fraud."),
        FraudReport::Clear => println!("✅ No potential fraud detected."),
        FraudReport::Alerts(alerts) => {
            println!("Potential Fraud Alerts:");
            for alert in alerts {
                println!(
                    "  {} | {} | total {} | tax {} | {}",
                    alert.id,
                    fmt_opt(&alert.invoice_number),
                    fmt_opt(&alert.total_amount),
                    fmt_opt(&alert.tax),
                    alert.message()
                );
            }
        }
    }
}
