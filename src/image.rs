// src/image.rs

use crate::error::{InvoiceError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use std::path::Path;
use tracing::info;

/// The image half of an extraction request.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageContent {
    /// Raw bytes, sent as a `data:` URI.
    Inline { mime_type: String, data: Vec<u8> },
    /// A remote image the endpoint fetches itself; passed through untouched.
    Url(String),
}

impl ImageContent {
    pub fn inline(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        ImageContent::Inline {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// The value placed in the request's `image_url.url` field.
    pub fn to_request_url(&self) -> String {
        match self {
            ImageContent::Inline { mime_type, data } => {
                format!("data:{mime_type};base64,{}", STANDARD.encode(data))
            }
            ImageContent::Url(url) => url.clone(),
        }
    }
}

/// One image queued for processing, with a label for logs and reports.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub name: String,
    pub content: ImageContent,
}

/// `image/jpeg` for .jpg/.jpeg, `image/png` for anything else.
pub fn mime_type_for(filename: &str) -> &'static str {
    let suffix = filename
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match suffix.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        _ => "image/png",
    }
}

/// Read an image file from disk.
pub fn load_image_file(path: impl AsRef<Path>) -> Result<ImageInput> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            InvoiceError::Io(std::io::Error::new(
                e.kind(),
                format!("file not found: {}", path.display()),
            ))
        } else {
            InvoiceError::Io(e)
        }
    })?;
    let name = path.display().to_string();
    let mime_type = mime_type_for(&name);
    info!(file = %name, bytes = data.len(), mime = mime_type, "Loaded image");
    Ok(ImageInput {
        name,
        content: ImageContent::inline(data, mime_type),
    })
}

/// Download an image so it can be sent inline.
pub async fn fetch_image(client: &Client, url: &str) -> Result<ImageInput> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(InvoiceError::Transport(format!(
            "error loading image from URL ({status}): {url}"
        )));
    }
    let data = response.bytes().await?.to_vec();
    info!(url = %url, bytes = data.len(), "Fetched image");
    Ok(ImageInput {
        name: url.to_string(),
        content: ImageContent::inline(data, "image/jpeg"),
    })
}

/// Treat `source` as a URL when it looks like one, otherwise as a file path.
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_from_suffix() {
        assert_eq!(mime_type_for("scan.JPG"), "image/jpeg");
        assert_eq!(mime_type_for("scan.jpeg"), "image/jpeg");
        assert_eq!(mime_type_for("scan.png"), "image/png");
        assert_eq!(mime_type_for("scan"), "image/png");
    }

    #[test]
    fn test_inline_image_becomes_data_uri() {
        let image = ImageContent::inline(b"abc".to_vec(), "image/png");
        assert_eq!(image.to_request_url(), "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_url_passes_through_unchanged() {
        let url = "https://example.com/invoice.jpg?sig=a%2Fb";
        assert_eq!(ImageContent::Url(url.to_string()).to_request_url(), url);
        assert!(is_url(url));
        assert!(!is_url("invoices/march.png"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_image_file("/definitely/not/here.png").unwrap_err();
        assert!(matches!(err, InvoiceError::Io(_)));
    }
}
