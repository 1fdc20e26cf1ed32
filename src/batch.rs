// src/batch.rs

use crate::error::InvoiceError;
use crate::heuristics::{InvoiceType, classify};
use crate::image::ImageInput;
use crate::llm_extract::build_extraction_prompt;
use crate::retry::{Extractor, extract_once, extract_with_retry};
use crate::session::Session;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

/// What happened to one image of the batch.
#[derive(Debug)]
pub enum ImageOutcome {
    Added {
        name: String,
        id: Uuid,
        invoice_type: InvoiceType,
    },
    Failed {
        name: String,
        error: InvoiceError,
    },
}

/// Extract every image in order, one at a time, adding successes to the session.
///
/// Each image gets its own retry budget; a failed image is reported and the
/// loop moves on. `on_progress` is called after each image with
/// `(done, total, outcome)`.
pub async fn process_batch<E, F>(
    session: &mut Session,
    extractor: &E,
    images: &[ImageInput],
    language: &str,
    max_attempts: u32,
    mut on_progress: F,
) -> Vec<ImageOutcome>
where
    E: Extractor + Sync + ?Sized,
    F: FnMut(usize, usize, &ImageOutcome),
{
    let total = images.len();
    let mut outcomes = Vec::with_capacity(total);

    for (index, image) in images.iter().enumerate() {
        let span = tracing::info_span!("extract", image = index + 1, source = %image.name);
        let outcome = process_image(session, extractor, image, language, max_attempts)
            .instrument(span)
            .await;
        on_progress(index + 1, total, &outcome);
        info!(done = index + 1, total, "Batch progress");
        outcomes.push(outcome);
    }

    outcomes
}

async fn process_image<E>(
    session: &mut Session,
    extractor: &E,
    image: &ImageInput,
    language: &str,
    max_attempts: u32,
) -> ImageOutcome
where
    E: Extractor + Sync + ?Sized,
{
    // First pass only decides the invoice type; a failure here is not fatal.
    let base_prompt = build_extraction_prompt(language, None);
    let invoice_type = match extract_once(extractor, &base_prompt, &image.content).await {
        Ok(initial) => classify(&initial.data),
        Err(e) => {
            warn!(error = %e, "Initial pass failed, using general prompt");
            InvoiceType::General
        }
    };
    info!(invoice_type = %invoice_type, "Detected invoice type");

    let prompt = build_extraction_prompt(language, Some(invoice_type));
    match extract_with_retry(extractor, &prompt, &image.content, max_attempts).await {
        Ok(result) => {
            let id = session.add(
                image.name.clone(),
                result.data,
                result.confidence_scores,
                invoice_type,
            );
            ImageOutcome::Added {
                name: image.name.clone(),
                id,
                invoice_type,
            }
        }
        Err(error) => {
            error!(error = %error, "Image could not be extracted");
            ImageOutcome::Failed {
                name: image.name.clone(),
                error,
            }
        }
    }
}
