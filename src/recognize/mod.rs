//! Text recognition on cropped vehicle regions.
//!
//! The recognizer is the slowest stage of the pipeline. It only runs on
//! recognition frames, only on tracked vehicles, and only on cache misses.

mod http;
mod region;

use anyhow::{anyhow, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{RecognitionBackendKind, RecognitionSettings};

pub use http::HttpRecognizer;
pub use region::{plate_region, MIN_RECOGNITION_HEIGHT, MIN_REGION_SIDE, REGION_PADDING};

/// One recognition candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextCandidate {
    pub text: String,
    pub confidence: f32,
}

impl TextCandidate {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Recognition backend trait.
///
/// Given a prepared grayscale region, return zero or more candidates. Calls
/// have high and variable latency and block the frame loop.
pub trait RecognitionBackend: Send {
    fn name(&self) -> &'static str;

    fn recognize(&mut self, region: &GrayImage) -> Result<Vec<TextCandidate>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Recognizer that never finds anything.
#[derive(Debug, Default)]
pub struct NoopRecognizer;

impl RecognitionBackend for NoopRecognizer {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn recognize(&mut self, _: &GrayImage) -> Result<Vec<TextCandidate>> {
        Ok(Vec::new())
    }
}

/// Recognizer that answers every call with the same candidates.
#[derive(Debug, Default)]
pub struct FixedRecognizer {
    candidates: Vec<TextCandidate>,
    calls: u64,
}

impl FixedRecognizer {
    pub fn new(candidates: Vec<TextCandidate>) -> Self {
        Self {
            candidates,
            calls: 0,
        }
    }

    /// Number of `recognize` calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl RecognitionBackend for FixedRecognizer {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn recognize(&mut self, _: &GrayImage) -> Result<Vec<TextCandidate>> {
        self.calls += 1;
        Ok(self.candidates.clone())
    }
}

/// Rules deciding which candidate, if any, is accepted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextQualifier {
    /// Candidates must score strictly above this.
    pub min_confidence: f32,
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for TextQualifier {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            min_len: 3,
            max_len: 12,
        }
    }
}

impl TextQualifier {
    /// Keep alphanumerics and hyphens, upper-cased.
    pub fn clean(text: &str) -> String {
        text.chars()
            .filter(|c| c.is_alphanumeric() || *c == '-')
            .flat_map(char::to_uppercase)
            .collect()
    }

    /// Cleaned text of a candidate, if it qualifies.
    pub fn accept(&self, candidate: &TextCandidate) -> Option<String> {
        if candidate.confidence <= self.min_confidence {
            return None;
        }
        let cleaned = Self::clean(&candidate.text);
        let len = cleaned.chars().count();
        if len < self.min_len || len > self.max_len {
            return None;
        }
        if !cleaned.chars().any(char::is_alphanumeric) {
            return None;
        }
        Some(cleaned)
    }

    /// Highest-confidence qualifying candidate. Ties keep the earlier one.
    pub fn best(&self, candidates: &[TextCandidate]) -> Option<String> {
        let mut best: Option<(f32, String)> = None;
        for candidate in candidates {
            let Some(cleaned) = self.accept(candidate) else {
                continue;
            };
            if best
                .as_ref()
                .map_or(true, |(confidence, _)| candidate.confidence > *confidence)
            {
                best = Some((candidate.confidence, cleaned));
            }
        }
        best.map(|(_, text)| text)
    }
}

/// Build the configured recognition backend, or `None` when recognition is off.
pub fn build_backend(settings: &RecognitionSettings) -> Result<Option<Box<dyn RecognitionBackend>>> {
    if !settings.enabled {
        return Ok(None);
    }
    let backend: Box<dyn RecognitionBackend> = match &settings.backend {
        RecognitionBackendKind::Noop => Box::new(NoopRecognizer),
        RecognitionBackendKind::Fixed { candidates } => {
            Box::new(FixedRecognizer::new(candidates.clone()))
        }
        RecognitionBackendKind::Http { endpoint } => {
            if endpoint.trim().is_empty() {
                return Err(anyhow!("http recognition backend requires an endpoint"));
            }
            Box::new(HttpRecognizer::new(
                endpoint.clone(),
                Duration::from_millis(settings.timeout_ms),
            ))
        }
    };
    Ok(Some(backend))
}
