//! Overlay description and drawing.
//!
//! `Overlay::build` turns a tracked set into one element per tracked entity
//! plus status lines; `annotate` draws the element boxes onto a copy of the
//! frame. Text is carried in the overlay for whoever displays it.

use image::{Rgb, RgbImage};
use std::collections::HashMap;

use crate::classify::{Category, DetectionMode};
use crate::detect::BoundingBox;
use crate::priority::Priority;
use crate::rank::{ClassifiedEntity, TrackedSet};

const BOX_THICKNESS: i32 = 2;
const LABEL_TAB_HEIGHT: i32 = 6;

const HIGH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const MEDIUM_COLOR: Rgb<u8> = Rgb([255, 165, 0]);
const LOW_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const PEDESTRIAN_COLOR: Rgb<u8> = Rgb([0, 255, 255]);

/// One drawn element.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayElement {
    pub bbox: BoundingBox,
    pub color: Rgb<u8>,
    pub label: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub elements: Vec<OverlayElement>,
    pub status: Vec<String>,
}

/// Inputs to an overlay beyond the tracked set itself.
#[derive(Clone, Copy, Debug)]
pub struct OverlayContext<'a> {
    pub mode: DetectionMode,
    pub pedestrians: bool,
    pub priority: Priority,
    /// Recognized text per tracked vehicle, aligned with `TrackedSet::vehicles`.
    pub vehicle_texts: &'a [Option<String>],
}

impl Overlay {
    pub fn build(tracked: &TrackedSet, ctx: OverlayContext<'_>) -> Self {
        let mut elements = Vec::with_capacity(tracked.len());

        for (i, vehicle) in tracked.vehicles.iter().enumerate() {
            let mut label = format!(
                "{} {:.2} [{}]",
                vehicle.detection.raw_label,
                vehicle.detection.confidence,
                vehicle.category.log_value()
            );
            if let Some(Some(text)) = ctx.vehicle_texts.get(i) {
                label.push_str(&format!(" | Plate: {}", text));
            }
            elements.push(element(vehicle, label));
        }
        for pedestrian in &tracked.pedestrians {
            let label = format!("Pedestrian {:.2}", pedestrian.detection.confidence);
            elements.push(element(pedestrian, label));
        }
        for object in &tracked.objects {
            let label = format!(
                "{} {:.2}",
                object.detection.raw_label, object.detection.confidence
            );
            elements.push(element(object, label));
        }

        let status = match ctx.mode {
            DetectionMode::General => general_status(tracked),
            DetectionMode::Vehicle if ctx.pedestrians => vec![format!(
                "Priority: {} | Vehicles: {}/{} | Pedestrians: {}",
                ctx.priority,
                tracked.vehicles.len(),
                tracked.capacity,
                tracked.pedestrians.len()
            )],
            DetectionMode::Vehicle => vec![format!(
                "Current Priority: {} | Tracking: {}/{} vehicles",
                ctx.priority,
                tracked.vehicles.len(),
                tracked.capacity
            )],
        };

        Self { elements, status }
    }
}

fn element(entity: &ClassifiedEntity, label: String) -> OverlayElement {
    OverlayElement {
        bbox: entity.detection.bbox,
        color: category_color(&entity.category),
        label,
    }
}

/// Per-label counts, most frequent first; ties ordered by label.
pub fn object_counts(tracked: &TrackedSet) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for object in &tracked.objects {
        *counts.entry(object.detection.raw_label.as_str()).or_default() += 1;
    }
    let mut counts: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(label, count)| (label.to_string(), count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

fn general_status(tracked: &TrackedSet) -> Vec<String> {
    let counts = object_counts(tracked);
    let mut lines = vec![format!(
        "Total Objects: {} | Unique Classes: {}",
        tracked.objects.len(),
        counts.len()
    )];
    lines.extend(
        counts
            .into_iter()
            .take(5)
            .map(|(label, count)| format!("{}: {}", label, count)),
    );
    lines
}

pub fn category_color(category: &Category) -> Rgb<u8> {
    match category {
        Category::High => HIGH_COLOR,
        Category::Medium => MEDIUM_COLOR,
        Category::Low => LOW_COLOR,
        Category::Pedestrian => PEDESTRIAN_COLOR,
        Category::Generic(label) => label_color(label),
    }
}

/// Stable color per label (FNV-1a over the label bytes).
fn label_color(label: &str) -> Rgb<u8> {
    let hash = label.bytes().fold(0x811c_9dc5u32, |acc, b| {
        (acc ^ u32::from(b)).wrapping_mul(0x0100_0193)
    });
    let [r, g, b, _] = hash.to_le_bytes();
    Rgb([r, g, b])
}

/// Draw every overlay element onto a copy of `frame`.
pub fn annotate(frame: &RgbImage, overlay: &Overlay) -> RgbImage {
    let mut out = frame.clone();
    for element in &overlay.elements {
        draw_box(&mut out, &element.bbox, element.color);
    }
    out
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let mut put = |x: i32, y: i32| {
        if x >= 0 && y >= 0 && x < w && y < h {
            image.put_pixel(x as u32, y as u32, color);
        }
    };
    for t in 0..BOX_THICKNESS {
        for x in bbox.x1..=bbox.x2 {
            put(x, bbox.y1 + t);
            put(x, bbox.y2 - t);
        }
        for y in bbox.y1..=bbox.y2 {
            put(bbox.x1 + t, y);
            put(bbox.x2 - t, y);
        }
    }
    // filled tab above the box where a label would sit
    for y in (bbox.y1 - LABEL_TAB_HEIGHT)..bbox.y1 {
        for x in bbox.x1..=bbox.x2 {
            put(x, y);
        }
    }
}
