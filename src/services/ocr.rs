//! Text extraction — OCR and document parsing behind a trait seam.

use async_trait::async_trait;

/// Material categories accepted for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Pdf,
    Image,
}

impl MaterialKind {
    /// Classify by MIME type. Unknown types are rejected upstream.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(Self::Pdf),
            m if m.starts_with("image/") => Some(Self::Image),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no text could be extracted from the material")]
    NoText,
    #[error("extraction backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("extraction backend error: {0}")]
    Backend(String),
}

impl crate::event::ErrorCode for ExtractError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NoText => "E_NO_TEXT",
            Self::Transport(_) => "E_EXTRACT_TRANSPORT",
            Self::Backend(_) => "E_EXTRACT_BACKEND",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Extraction seam.
#[async_trait]
pub trait ExtractText: Send + Sync {
    /// Extract plain text from an uploaded material.
    ///
    /// # Errors
    ///
    /// `NoText` when the material yields nothing usable; transport or
    /// backend errors otherwise.
    async fn extract(&self, kind: MaterialKind, filename: &str, bytes: Vec<u8>) -> Result<String, ExtractError>;
}

// =============================================================================
// HTTP BACKEND
// =============================================================================

/// Extractor backed by an external OCR service.
pub struct HttpTextExtractor {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(serde::Deserialize)]
struct ExtractResponse {
    text: String,
}

impl HttpTextExtractor {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self { client: reqwest::Client::new(), endpoint }
    }

    /// Build from `OCR_SERVICE_URL`, if set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("OCR_SERVICE_URL").ok().map(Self::new)
    }
}

#[async_trait]
impl ExtractText for HttpTextExtractor {
    async fn extract(&self, kind: MaterialKind, filename: &str, bytes: Vec<u8>) -> Result<String, ExtractError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("kind", kind.as_str())
            .part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Backend(format!("{status}: {body}")));
        }

        let parsed: ExtractResponse = response.json().await?;
        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            return Err(ExtractError::NoText);
        }
        Ok(text)
    }
}
