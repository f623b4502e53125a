use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Detector backend that delegates to an inference server over HTTP.
///
/// The frame is POSTed as a JPEG body; the server answers with a JSON array of
/// `{box, confidence, class_index, class_name}` objects in the coordinate
/// space of the posted image.
pub struct HttpDetectorBackend {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpDetectorBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl DetectorBackend for HttpDetectorBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let body = encode_jpeg(image)?;
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "image/jpeg")
            .send_bytes(&body)
            .with_context(|| format!("post frame to {}", self.endpoint))?;
        let detections: Vec<RawDetection> = response
            .into_json()
            .map_err(|e| anyhow!("invalid detector response from {}: {}", self.endpoint, e))?;
        Ok(detections)
    }
}

fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .context("encode frame as jpeg")?;
    Ok(bytes)
}
