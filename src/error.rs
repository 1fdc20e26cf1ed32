// src/error.rs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, InvoiceError>;

/// Everything that can go wrong between reading an image and saving an edit.
#[derive(Debug, Error)]
pub enum InvoiceError {
    /// Network or HTTP failure talking to the inference endpoint or an image host.
    #[error("transport error: {0}")]
    Transport(String),

    /// Reply was not JSON, or did not have the `{data, confidence_scores}` shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Well-formed reply whose `data` fields were all null.
    #[error("extraction produced no data after {attempts} attempts")]
    EmptyExtraction { attempts: u32 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("failed to parse invoice after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<InvoiceError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for InvoiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            InvoiceError::Transport(format!("check your internet connection and try again ({e})"))
        } else {
            InvoiceError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for InvoiceError {
    fn from(e: serde_json::Error) -> Self {
        InvoiceError::MalformedResponse(e.to_string())
    }
}

impl From<csv::Error> for InvoiceError {
    fn from(e: csv::Error) -> Self {
        InvoiceError::Export(e.to_string())
    }
}
