use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawDetection;

/// Detector backend trait.
///
/// A backend is the object-detection model seen from the pipeline: a frame
/// goes in, a flat list of raw detections comes out. Latency is unspecified
/// and the call blocks the frame loop for its full duration; the scheduler's
/// detection interval is what amortizes it.
///
/// Coordinates in the returned detections are in the space of `image`. The
/// caller rescales them when `image` is a downscaled copy.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        (**self).detect(image)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
