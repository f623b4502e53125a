use image::{imageops, GrayImage, RgbImage};

use crate::detect::BoundingBox;

/// Padding added around a vehicle box before cropping.
pub const REGION_PADDING: i32 = 10;
/// Padded regions narrower or shorter than this are not worth recognizing.
pub const MIN_REGION_SIDE: u32 = 20;
/// Plates sit in the lower 40% of a vehicle box (band starts at 6/10).
const PLATE_BAND_START_TENTHS: u32 = 6;
/// Regions are upscaled to at least this height before recognition.
pub const MIN_RECOGNITION_HEIGHT: u32 = 50;

/// Crop the plate band of a vehicle box and prepare it for recognition.
///
/// Returns `None` when the padded region is degenerate or too small.
pub fn plate_region(frame: &RgbImage, bbox: &BoundingBox) -> Option<GrayImage> {
    let (width, height) = (frame.width() as i32, frame.height() as i32);
    let x1 = bbox.x1.saturating_sub(REGION_PADDING).max(0);
    let y1 = bbox.y1.saturating_sub(REGION_PADDING).max(0);
    let x2 = bbox.x2.saturating_add(REGION_PADDING).min(width);
    let y2 = bbox.y2.saturating_add(REGION_PADDING).min(height);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let roi_width = (x2 - x1) as u32;
    let roi_height = (y2 - y1) as u32;
    if roi_width < MIN_REGION_SIDE || roi_height < MIN_REGION_SIDE {
        return None;
    }

    let band_offset = roi_height * PLATE_BAND_START_TENTHS / 10;
    let (band_y, band_height) = if band_offset < roi_height {
        (y1 as u32 + band_offset, roi_height - band_offset)
    } else {
        (y1 as u32, roi_height)
    };

    let band = imageops::crop_imm(frame, x1 as u32, band_y, roi_width, band_height).to_image();
    let gray = imageops::grayscale(&band);
    Some(upscale_to_min_height(gray))
}

fn upscale_to_min_height(gray: GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    if h == 0 || h >= MIN_RECOGNITION_HEIGHT {
        return gray;
    }
    let scale = MIN_RECOGNITION_HEIGHT as f32 / h as f32;
    let new_width = ((w as f32) * scale).max(1.0) as u32;
    imageops::resize(
        &gray,
        new_width,
        MIN_RECOGNITION_HEIGHT,
        imageops::FilterType::CatmullRom,
    )
}
