// src/retry.rs

use crate::error::{InvoiceError, Result};
use crate::image::ImageContent;
use crate::llm_extract::{ExtractionResult, LlmClient, parse_envelope};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

/// Anything that can turn a prompt and an image into a raw JSON reply.
#[async_trait]
pub trait Extractor {
    async fn extract(&self, prompt: &str, image: &ImageContent) -> Result<Value>;
}

#[async_trait]
impl Extractor for LlmClient {
    async fn extract(&self, prompt: &str, image: &ImageContent) -> Result<Value> {
        LlmClient::extract(self, prompt, image, self.model()).await
    }
}

/// Run one extraction and parse it, with no retry. Empty replies are errors.
pub async fn extract_once<E>(extractor: &E, prompt: &str, image: &ImageContent) -> Result<ExtractionResult>
where
    E: Extractor + Sync + ?Sized,
{
    let reply = extractor.extract(prompt, image).await?;
    let result = parse_envelope(&reply)?;
    if result.is_empty() {
        return Err(InvoiceError::EmptyExtraction { attempts: 1 });
    }
    Ok(result)
}

/// Call `extractor` until it yields a non-empty, well-formed record or
/// `max_attempts` calls have been made.
///
/// Transport errors, malformed replies and all-null replies are all retried
/// the same way. The error returned on exhaustion names the attempt count.
pub async fn extract_with_retry<E>(
    extractor: &E,
    prompt: &str,
    image: &ImageContent,
    max_attempts: u32,
) -> Result<ExtractionResult>
where
    E: Extractor + Sync + ?Sized,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        let outcome = match extractor.extract(prompt, image).await {
            Ok(reply) => parse_envelope(&reply),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) if result.is_empty() => {
                if attempt < max_attempts {
                    warn!(attempt, max_attempts, "No data extracted, retrying");
                } else {
                    warn!(attempt, max_attempts, "All attempts failed to extract data");
                }
                last_error = None;
            }
            Ok(result) => {
                let (filled, total) = result.data.coverage();
                info!(attempt, filled, total, "Extraction succeeded");
                return Ok(result);
            }
            Err(e) => {
                if attempt < max_attempts {
                    warn!(attempt, max_attempts, error = %e, "Attempt failed, retrying");
                } else {
                    warn!(attempt, max_attempts, error = %e, "Final attempt failed");
                }
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(source) => InvoiceError::RetriesExhausted {
            attempts: max_attempts,
            source: Box::new(source),
        },
        None => InvoiceError::EmptyExtraction {
            attempts: max_attempts,
        },
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays a fixed script of replies and counts calls.
    pub(crate) struct ScriptedExtractor {
        replies: Mutex<VecDeque<Result<Value>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedExtractor {
        pub(crate) fn new(replies: Vec<Result<Value>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Extractor for ScriptedExtractor {
        async fn extract(&self, _prompt: &str, _image: &ImageContent) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(InvoiceError::Transport("script exhausted".into())))
        }
    }

    pub(crate) fn empty_reply() -> Result<Value> {
        Ok(json!({"data": {"invoice_number": null, "total_amount": null}, "confidence_scores": {}}))
    }

    pub(crate) fn invoice_reply(number: &str, total: f64) -> Result<Value> {
        Ok(json!({
            "data": {"invoice_number": number, "vendor_name": "Acme Store", "total_amount": total},
            "confidence_scores": {"invoice_number": 0.9}
        }))
    }

    fn image() -> ImageContent {
        ImageContent::Url("https://example.com/a.png".into())
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt_after_empty_replies() {
        let extractor = ScriptedExtractor::new(vec![
            empty_reply(),
            empty_reply(),
            invoice_reply("INV-7", 50.0),
        ]);
        let result = extract_with_retry(&extractor, "p", &image(), 3).await.unwrap();
        assert_eq!(result.data.invoice_number.as_deref(), Some("INV-7"));
        assert_eq!(extractor.calls(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let extractor = ScriptedExtractor::new(vec![invoice_reply("A", 1.0), invoice_reply("B", 2.0)]);
        let result = extract_with_retry(&extractor, "p", &image(), 2).await.unwrap();
        assert_eq!(result.data.invoice_number.as_deref(), Some("A"));
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_empty_exhausts_budget() {
        let extractor = ScriptedExtractor::new(vec![empty_reply(), empty_reply(), empty_reply()]);
        let err = extract_with_retry(&extractor, "p", &image(), 2).await.unwrap_err();
        assert!(matches!(err, InvoiceError::EmptyExtraction { attempts: 2 }));
        assert_eq!(err.to_string(), "extraction produced no data after 2 attempts");
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_retried() {
        let extractor = ScriptedExtractor::new(vec![
            Err(InvoiceError::Transport("connection reset".into())),
            invoice_reply("INV-2", 10.0),
        ]);
        let result = extract_with_retry(&extractor, "p", &image(), 2).await.unwrap();
        assert_eq!(result.data.total_amount, Some(10.0));
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_errors_are_wrapped_with_attempt_count() {
        let extractor = ScriptedExtractor::new(vec![
            Err(InvoiceError::Transport("timeout".into())),
            Ok(json!({"data": "not an object"})),
        ]);
        let err = extract_with_retry(&extractor, "p", &image(), 2).await.unwrap_err();
        match err {
            InvoiceError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, InvoiceError::MalformedResponse(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_data_object_counts_as_empty() {
        let extractor = ScriptedExtractor::new(vec![Ok(json!({"data": {}}))]);
        let err = extract_with_retry(&extractor, "p", &image(), 1).await.unwrap_err();
        assert!(matches!(err, InvoiceError::EmptyExtraction { attempts: 1 }));
    }

    #[tokio::test]
    async fn test_extract_once_does_not_retry() {
        let extractor = ScriptedExtractor::new(vec![empty_reply(), invoice_reply("X", 1.0)]);
        let err = extract_once(&extractor, "p", &image()).await.unwrap_err();
        assert!(matches!(err, InvoiceError::EmptyExtraction { attempts: 1 }));
        assert_eq!(extractor.calls(), 1);
    }
}
