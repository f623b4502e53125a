use anyhow::{anyhow, Context, Result};
use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use std::time::Duration;

use super::{RecognitionBackend, TextCandidate};

/// Recognition backend backed by an OCR server.
///
/// The region is POSTed as PNG; the server answers with a JSON array of
/// `{text, confidence}` candidates.
pub struct HttpRecognizer {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpRecognizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl RecognitionBackend for HttpRecognizer {
    fn name(&self) -> &'static str {
        "http"
    }

    fn recognize(&mut self, region: &GrayImage) -> Result<Vec<TextCandidate>> {
        let mut body = Vec::new();
        region
            .write_to(&mut Cursor::new(&mut body), ImageFormat::Png)
            .context("encode region as png")?;
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "image/png")
            .send_bytes(&body)
            .with_context(|| format!("post region to {}", self.endpoint))?;
        response
            .into_json()
            .map_err(|e| anyhow!("invalid recognizer response from {}: {}", self.endpoint, e))
    }
}
