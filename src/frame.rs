//! Decoded frames as they flow through the pipeline.
//!
//! - `Frame`: one decoded RGB frame plus its acquisition index.
//! - `DetectionInput`: the (possibly downscaled) copy handed to a detector,
//!   together with the factor that maps its coordinates back to the source.

use image::{imageops, RgbImage};
use std::borrow::Cow;

/// One decoded frame in source resolution.
///
/// Frames are owned by the frame loop for exactly one iteration; only the
/// annotated output of a processed frame outlives it.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Monotonic acquisition counter, assigned by the source (starts at 1).
    pub index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Prepare the detector input for this frame.
    ///
    /// Scales below 1.0 produce a bilinear-downscaled copy; anything else
    /// borrows the frame unchanged.
    pub fn detection_input(&self, process_scale: f32) -> DetectionInput<'_> {
        if process_scale > 0.0 && process_scale < 1.0 {
            let width = ((self.width() as f32) * process_scale).round().max(1.0) as u32;
            let height = ((self.height() as f32) * process_scale).round().max(1.0) as u32;
            let resized = imageops::resize(
                &self.image,
                width,
                height,
                imageops::FilterType::Triangle,
            );
            DetectionInput {
                image: Cow::Owned(resized),
                scale_back: 1.0 / process_scale,
            }
        } else {
            DetectionInput {
                image: Cow::Borrowed(&self.image),
                scale_back: 1.0,
            }
        }
    }
}

/// Image handed to the detector plus the factor back to source coordinates.
pub struct DetectionInput<'a> {
    pub image: Cow<'a, RgbImage>,
    pub scale_back: f32,
}
