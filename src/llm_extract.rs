// src/llm_extract.rs

use crate::config::LlmSection;
use crate::error::{InvoiceError, Result};
use crate::heuristics::InvoiceType;
use crate::image::ImageContent;
use crate::schema::{ConfidenceScores, InvoiceData, all_fields_null};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

const EXTRACTION_TEMPERATURE: f64 = 0.4;
const EXTRACTION_MAX_TOKENS: u32 = 1024;
const CHAT_TEMPERATURE: f64 = 0.7;
const CHAT_MAX_TOKENS: u32 = 512;

/// Prompt template for extraction. `{language}` and `{schema}` are filled in.
const EXTRACTION_PROMPT: &str = r#"You are an intelligent OCR extraction agent capable of understanding and processing invoices in {language}.
Extract all relevant information from the provided invoice image in structured JSON format.
The JSON object must follow this schema: {schema}.
Include a confidence score (0.0 to 1.0) for each extracted field in a separate 'confidence_scores' object.
If a field cannot be found, return it as null.
Look for common invoice patterns such as:
- Invoice number: Often labeled as 'Invoice #', 'No.', or similar.
- Dates: Look for 'Date', 'Issued', 'Due', in formats like MM/DD/YYYY or DD/MM/YYYY.
- Addresses: Look for 'Bill to', 'Ship to', or multi-line address blocks.
- Line items: Tables or lists with description, quantity, unit price, and total.
- Totals: Look for 'Subtotal', 'Tax', 'Total', often at the bottom.
- Currency: Look for symbols ($, €, £) or codes (USD, EUR).
Return the result strictly in JSON format with 'data' and 'confidence_scores' keys.
Example:
{
  "data": {
    "invoice_number": "INV123",
    "invoice_date": "2025-01-01",
    ...
  },
  "confidence_scores": {
    "invoice_number": 0.95,
    "invoice_date": 0.90,
    ...
  }
}"#;

/// Build the extraction prompt, optionally tailored to a detected invoice type.
pub fn build_extraction_prompt(language: &str, invoice_type: Option<InvoiceType>) -> String {
    let schema = serde_json::to_string_pretty(&InvoiceData::json_schema()).unwrap_or_default();
    let mut prompt = EXTRACTION_PROMPT
        .replace("{language}", language)
        .replace("{schema}", &schema);
    if let Some(ty) = invoice_type {
        prompt.push_str(&format!(
            "\nSpecific instructions for {ty} invoices: {}",
            ty.prompt_hint()
        ));
    }
    prompt
}

/// Prompt for a free-text question over the current batch.
pub fn build_chat_prompt(invoice_context: &str, question: &str) -> String {
    format!(
        "You are an invoice processing assistant. Use the following invoice data as context:\n\
         {invoice_context}\n\
         Answer the user's question: {question}\n\
         Provide a concise, accurate response. If the question is unrelated to invoices, \
         politely redirect to invoice-related queries."
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// A parsed extraction reply: the raw `data` object alongside its typed form.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub raw_data: Map<String, Value>,
    pub data: InvoiceData,
    pub confidence_scores: ConfidenceScores,
}

impl ExtractionResult {
    /// Whether every field of the raw reply was null.
    pub fn is_empty(&self) -> bool {
        all_fields_null(&self.raw_data)
    }
}

/// Validate the `{data, confidence_scores}` envelope and build the typed record.
pub fn parse_envelope(reply: &Value) -> Result<ExtractionResult> {
    let envelope = reply
        .as_object()
        .ok_or_else(|| InvoiceError::MalformedResponse("reply is not a JSON object".into()))?;

    let raw_data = match envelope.get("data") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => {
            return Err(InvoiceError::MalformedResponse(
                "reply has no 'data' object".into(),
            ));
        }
        Some(other) => {
            return Err(InvoiceError::MalformedResponse(format!(
                "'data' must be an object, got {other}"
            )));
        }
    };

    let confidence_scores = match envelope.get("confidence_scores") {
        Some(Value::Object(map)) => {
            ConfidenceScores::from_json(map).map_err(InvoiceError::MalformedResponse)?
        }
        Some(Value::Null) | None => ConfidenceScores::default(),
        Some(other) => {
            return Err(InvoiceError::MalformedResponse(format!(
                "'confidence_scores' must be an object, got {other}"
            )));
        }
    };

    let data: InvoiceData = serde_json::from_value(Value::Object(raw_data.clone()))
        .map_err(|e| InvoiceError::MalformedResponse(format!("invalid invoice data: {e}")))?;

    Ok(ExtractionResult {
        raw_data,
        data,
        confidence_scores,
    })
}

/// Client for an OpenAI-compatible chat completions endpoint with vision support.
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl LlmClient {
    pub fn new(llm: &LlmSection, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()?;
        info!(url = %llm.base_url, model = %llm.model, "Using inference endpoint");
        Ok(Self {
            client,
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            model: llm.model.clone(),
            api_key,
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One extraction call. Returns the model's JSON reply as-is; no retries here.
    pub async fn extract(&self, prompt: &str, image: &ImageContent, model: &str) -> Result<Value> {
        let request = extraction_request(prompt, image, model);
        let content = self.complete(&request).await?;
        let json_str = extract_json_object(strip_fences(&content))?;
        serde_json::from_str(json_str).map_err(|e| {
            InvoiceError::MalformedResponse(format!("reply is not valid JSON: {e}\nRaw: {json_str}"))
        })
    }

    /// Free-text question answering. No retries.
    pub async fn run_chat_query(&self, prompt: &str) -> Result<String> {
        let request = chat_request(&self.model, prompt);
        self.complete(&request).await
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Inference endpoint returned an error");
            return Err(InvoiceError::Transport(format!("LLM API error {status}: {body}")));
        }

        let body = response.text().await?;
        let chat_response: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            InvoiceError::MalformedResponse(format!("unexpected completion payload: {e}"))
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InvoiceError::MalformedResponse("empty response from LLM".into()))
    }
}

/// Multimodal request: prompt text plus one image part, JSON-object output.
fn extraction_request(prompt: &str, image: &ImageContent, model: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: prompt.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.to_request_url(),
                    },
                },
            ]),
        }],
        temperature: EXTRACTION_TEMPERATURE,
        max_completion_tokens: Some(EXTRACTION_MAX_TOKENS),
        max_tokens: None,
        stream: false,
        response_format: Some(ResponseFormat {
            format_type: "json_object",
        }),
    }
}

fn chat_request(model: &str, prompt: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: "user",
            content: MessageContent::Text(prompt.to_string()),
        }],
        temperature: CHAT_TEMPERATURE,
        max_completion_tokens: None,
        max_tokens: Some(CHAT_MAX_TOKENS),
        stream: false,
        response_format: None,
    }
}

/// Strip markdown fences if the model added them despite instructions.
fn strip_fences(content: &str) -> &str {
    content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Extract the outermost JSON object from a string that may carry
/// surrounding text.
fn extract_json_object(s: &str) -> Result<&str> {
    let start = s
        .find('{')
        .ok_or_else(|| InvoiceError::MalformedResponse("no '{' found in LLM response".into()))?;
    let end = s
        .rfind('}')
        .ok_or_else(|| InvoiceError::MalformedResponse("no '}' found in LLM response".into()))?;
    if end <= start {
        return Err(InvoiceError::MalformedResponse(
            "malformed JSON in LLM response".into(),
        ));
    }
    Ok(&s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_embeds_language_and_schema() {
        let prompt = build_extraction_prompt("Spanish", None);
        assert!(prompt.contains("processing invoices in Spanish"));
        assert!(prompt.contains("\"billing_address\""));
        assert!(prompt.contains("'data' and 'confidence_scores'"));
        assert!(!prompt.contains("Specific instructions"));
    }

    #[test]
    fn test_prompt_appends_type_hint() {
        let prompt = build_extraction_prompt("English", Some(InvoiceType::Utility));
        assert!(prompt.ends_with(
            "Specific instructions for utility invoices: Prioritize billing periods, meter readings, and rate structures."
        ));
    }

    #[test]
    fn test_extraction_request_with_url_image() {
        let image = ImageContent::Url("https://x/y.png".into());
        let v = serde_json::to_value(extraction_request("p", &image, "m")).unwrap();
        assert_eq!(v["model"], "m");
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["messages"][0]["content"][0], json!({"type": "text", "text": "p"}));
        assert_eq!(
            v["messages"][0]["content"][1],
            json!({"type": "image_url", "image_url": {"url": "https://x/y.png"}})
        );
        assert_eq!(v["temperature"], EXTRACTION_TEMPERATURE);
        assert_eq!(v["response_format"]["type"], "json_object");
        assert_eq!(v["max_completion_tokens"], 1024);
        assert!(v.get("max_tokens").is_none());
    }

    #[test]
    fn test_extraction_request_with_inline_image() {
        let image = ImageContent::inline(vec![1, 2, 3], "image/png");
        let v = serde_json::to_value(extraction_request("p", &image, "m")).unwrap();
        assert_eq!(
            v["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );
    }

    #[test]
    fn test_chat_request_uses_plain_content() {
        let v = serde_json::to_value(chat_request("m", "hello")).unwrap();
        assert_eq!(v["model"], "m");
        assert_eq!(v["messages"][0]["content"], "hello");
        assert_eq!(v["temperature"], CHAT_TEMPERATURE);
        assert_eq!(v["max_tokens"], 512);
        assert!(v.get("max_completion_tokens").is_none());
        assert!(v.get("response_format").is_none());
    }

    #[test]
    fn test_parse_envelope() {
        let reply = json!({
            "data": {"invoice_number": "INV-1", "total_amount": 120.5, "tax": null},
            "confidence_scores": {"invoice_number": 0.9}
        });
        let result = parse_envelope(&reply).unwrap();
        assert!(!result.is_empty());
        assert_eq!(result.data.invoice_number.as_deref(), Some("INV-1"));
        assert_eq!(result.confidence_scores.get("invoice_number"), Some(0.9));
        assert_eq!(result.confidence_scores.get("total_amount"), None);
    }

    #[test]
    fn test_parse_envelope_without_scores() {
        let result = parse_envelope(&json!({"data": {"tax": null}})).unwrap();
        assert!(result.is_empty());
        assert!(result.confidence_scores.is_empty());
    }

    #[test]
    fn test_parse_envelope_rejects_bad_structure() {
        for reply in [
            json!([1, 2]),
            json!({"confidence_scores": {}}),
            json!({"data": "INV-1"}),
            json!({"data": {}, "confidence_scores": [0.5]}),
            json!({"data": {"total_amount": "n/a"}}),
            json!({"data": {"invoice_number": "X", "total_amount": "Infinity"}}),
        ] {
            let err = parse_envelope(&reply).unwrap_err();
            assert!(matches!(err, InvoiceError::MalformedResponse(_)), "{reply}");
        }
    }

    #[test]
    fn test_json_object_is_cut_out_of_surrounding_text() {
        let raw = "```json\nSure! {\"data\": {}} hope this helps\n```";
        assert_eq!(extract_json_object(strip_fences(raw)).unwrap(), "{\"data\": {}}");
        assert!(extract_json_object("no json here").is_err());
        assert!(extract_json_object("} backwards {").is_err());
    }

    #[test]
    fn test_chat_prompt_contains_context_and_question() {
        let prompt = build_chat_prompt("[]", "List all vendors");
        assert!(prompt.contains("as context:\n[]"));
        assert!(prompt.contains("Answer the user's question: List all vendors"));
    }
}
