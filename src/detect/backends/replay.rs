use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Replays a fixed script of detection sets, one set per `detect` call,
/// cycling back to the start when the script is exhausted.
///
/// Script boxes are normalized (0..1) and are scaled to the size of the image
/// passed in, so the same script works at any processing scale.
pub struct ReplayBackend {
    script: Vec<Vec<RawDetection>>,
    cursor: usize,
}

impl ReplayBackend {
    pub fn new(script: Vec<Vec<RawDetection>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Load a script from a JSON file: an array of per-call detection arrays.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read replay script {}", path.display()))?;
        let script: Vec<Vec<RawDetection>> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid replay script {}: {}", path.display(), e))?;
        Ok(Self::new(script))
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let set = &self.script[self.cursor % self.script.len()];
        self.cursor = self.cursor.wrapping_add(1);

        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(set
            .iter()
            .map(|det| {
                let [x1, y1, x2, y2] = det.bbox;
                RawDetection {
                    bbox: [x1 * w, y1 * h, x2 * w, y2 * h],
                    ..det.clone()
                }
            })
            .collect())
    }
}
