//! Synthetic frame source (`stub://`).
//!
//! Produces a moving gradient so that downscaling and region crops have
//! something to work on. A finite frame count makes it behave like a short
//! video file that ends and can be rewound.

use anyhow::{anyhow, Result};
use image::RgbImage;
use url::Url;

use super::{FrameSource, SourceKind, SourceStats};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    /// Frames per pass; `None` never ends.
    frames: Option<u64>,
    position: u64,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, frames: Option<u64>) -> Self {
        Self {
            name: "stub://synthetic".to_string(),
            width: width.max(1),
            height: height.max(1),
            frames,
            position: 0,
            frame_count: 0,
            connected: false,
        }
    }

    /// Parse `stub://name?width=W&height=H&frames=N`.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| anyhow!("invalid stub url {}: {}", raw, e))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("synthetic source expects a stub:// url, got {}", raw));
        }
        let mut source = Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT, None);
        for (key, value) in url.query_pairs() {
            let parsed: u64 = value
                .parse()
                .map_err(|_| anyhow!("stub parameter {} must be an integer", key))?;
            match key.as_ref() {
                "width" => source.width = (parsed as u32).max(1),
                "height" => source.height = (parsed as u32).max(1),
                "frames" => source.frames = Some(parsed),
                other => return Err(anyhow!("unknown stub parameter {}", other)),
            }
        }
        source.name = raw.to_string();
        Ok(source)
    }

    fn render(&self) -> RgbImage {
        let shift = self.frame_count as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            image::Rgb([
                (x.wrapping_add(shift) % 256) as u8,
                (y % 256) as u8,
                ((x + y) / 2 % 256) as u8,
            ])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        self.position = 0;
        log::info!("{}: connected (synthetic)", self.name);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self.frames.is_some_and(|frames| self.position >= frames) {
            return Ok(None);
        }
        self.position += 1;
        self.frame_count += 1;
        Ok(Some(self.render()))
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.name.clone(),
        }
    }

    fn nominal_fps(&self) -> Option<f32> {
        Some(30.0)
    }

    fn release(&mut self) {
        self.connected = false;
    }
}
