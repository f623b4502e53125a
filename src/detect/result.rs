use serde::{Deserialize, Serialize};

/// One raw detector output, in the coordinate space of the image the
/// detector was given.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]`
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    pub confidence: f32,
    #[serde(default)]
    pub class_index: i64,
    pub class_name: String,
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], confidence: f32, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_index: -1,
            class_name: class_name.into(),
        }
    }

    /// Map into source-frame coordinates.
    ///
    /// Coordinates are multiplied by `scale_back` and truncated toward zero,
    /// so a detection on a downscaled copy lands on integer source pixels.
    pub fn into_detection(self, scale_back: f32) -> Detection {
        let [x1, y1, x2, y2] = self.bbox;
        Detection {
            bbox: BoundingBox {
                x1: (x1 * scale_back) as i32,
                y1: (y1 * scale_back) as i32,
                x2: (x2 * scale_back) as i32,
                y2: (y2 * scale_back) as i32,
            },
            confidence: self.confidence.clamp(0.0, 1.0),
            raw_label: self.class_name,
        }
    }
}

/// Axis-aligned box in source-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Position-only identity of this box. Two boxes share a key only when
    /// all four coordinates match.
    pub fn spatial_key(&self) -> String {
        format!("{}_{}_{}_{}", self.x1, self.y1, self.x2, self.y2)
    }
}

/// A detection in source-frame coordinates. Immutable once produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub raw_label: String,
}
