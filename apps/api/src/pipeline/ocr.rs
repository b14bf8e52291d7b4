//! OCR fallback for scanned PDFs.
//!
//! OCR is CPU- and model-heavy, so it lives behind an external sidecar
//! service; this module is the typed seam. `AppState` carries an
//! `Arc<dyn OcrEngine>` so the orchestrator never knows which backend runs,
//! and tests substitute an in-memory fake.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::pipeline::extract::ExtractionError;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Renders the PDF's pages to images, runs character recognition, and
    /// returns the concatenated text. The orchestrator bounds this with a
    /// stage timeout and invokes it at most once per evaluation.
    async fn recognize(&self, pdf_bytes: &[u8]) -> Result<String, ExtractionError>;
}

/// OCR backend that posts the document to a sidecar HTTP service
/// (`POST <endpoint>` with the raw PDF body, JSON `{"text": ...}` back).
pub struct HttpOcrEngine {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
}

impl HttpOcrEngine {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
            endpoint,
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize(&self, pdf_bytes: &[u8]) -> Result<String, ExtractionError> {
        debug!(bytes = pdf_bytes.len(), "Sending document to OCR service");

        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/pdf")
            .body(pdf_bytes.to_vec())
            .send()
            .await
            .map_err(|e| ExtractionError::Ocr(format!("OCR service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Ocr(format!(
                "OCR service returned {status}: {body}"
            )));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Ocr(format!("invalid OCR response: {e}")))?;

        Ok(parsed.text)
    }
}

/// Stand-in when no OCR endpoint is configured: scanned PDFs fail the
/// parsability check with an actionable message instead of hanging.
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn recognize(&self, _pdf_bytes: &[u8]) -> Result<String, ExtractionError> {
        Err(ExtractionError::Ocr(
            "no OCR engine is configured; scanned documents cannot be processed".to_string(),
        ))
    }
}
