//! Proximity ranking and per-frame entity selection.

use std::cmp::Ordering;

use crate::classify::Category;
use crate::detect::Detection;

/// Default number of vehicles tracked per frame.
pub const DEFAULT_MAX_VEHICLES: usize = 5;

/// A detection with its category and proximity for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedEntity {
    pub detection: Detection,
    pub category: Category,
    /// `frame_height - y2`, floored at zero. Lower is nearer the camera.
    pub proximity: u32,
}

impl ClassifiedEntity {
    pub fn new(detection: Detection, category: Category, frame_height: u32) -> Self {
        let proximity = proximity(frame_height, &detection);
        Self {
            detection,
            category,
            proximity,
        }
    }
}

/// Proximity of a detection: distance from the box bottom to the frame bottom.
pub fn proximity(frame_height: u32, detection: &Detection) -> u32 {
    (i64::from(frame_height) - i64::from(detection.bbox.y2)).max(0) as u32
}

/// Nearest `k` entities, ascending proximity.
///
/// The sort is stable: entities with equal proximity keep adapter order.
pub fn rank(mut entities: Vec<ClassifiedEntity>, k: usize) -> Vec<ClassifiedEntity> {
    entities.sort_by_key(|entity| entity.proximity);
    entities.truncate(k);
    entities
}

/// The entities kept for one processed frame.
///
/// Vehicles are capped at `capacity`; pedestrians are all kept in adapter
/// order; generic objects are all kept, most confident first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackedSet {
    pub vehicles: Vec<ClassifiedEntity>,
    pub pedestrians: Vec<ClassifiedEntity>,
    pub objects: Vec<ClassifiedEntity>,
    pub capacity: usize,
}

impl TrackedSet {
    pub fn build(entities: Vec<ClassifiedEntity>, capacity: usize) -> Self {
        let mut vehicles = Vec::new();
        let mut pedestrians = Vec::new();
        let mut objects = Vec::new();
        for entity in entities {
            match entity.category {
                Category::High | Category::Medium | Category::Low => vehicles.push(entity),
                Category::Pedestrian => pedestrians.push(entity),
                Category::Generic(_) => objects.push(entity),
            }
        }

        objects.sort_by(|a, b| {
            b.detection
                .confidence
                .partial_cmp(&a.detection.confidence)
                .unwrap_or(Ordering::Equal)
        });

        Self {
            vehicles: rank(vehicles, capacity),
            pedestrians,
            objects,
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty() && self.pedestrians.is_empty() && self.objects.is_empty()
    }

    /// Every kept entity, vehicles first.
    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedEntity> {
        self.vehicles
            .iter()
            .chain(self.pedestrians.iter())
            .chain(self.objects.iter())
    }

    pub fn len(&self) -> usize {
        self.vehicles.len() + self.pedestrians.len() + self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn entity(label: &str, category: Category, y2: i32, frame_height: u32) -> ClassifiedEntity {
        let detection = Detection {
            bbox: BoundingBox::new(0, 0, 10, y2),
            confidence: 0.5,
            raw_label: label.to_string(),
        };
        ClassifiedEntity::new(detection, category, frame_height)
    }

    #[test]
    fn proximity_is_distance_to_frame_bottom() {
        let e = entity("car", Category::Low, 400, 480);
        assert_eq!(e.proximity, 80);
        let below = entity("car", Category::Low, 500, 480);
        assert_eq!(below.proximity, 0);
    }

    #[test]
    fn caps_vehicles_only() {
        let mut all = Vec::new();
        for i in 0..8 {
            all.push(entity("car", Category::Low, 100 + i, 480));
            all.push(entity("person", Category::Pedestrian, 100 + i, 480));
        }
        let set = TrackedSet::build(all, 5);
        assert_eq!(set.vehicles.len(), 5);
        assert_eq!(set.pedestrians.len(), 8);
        assert_eq!(set.vehicles[0].proximity, 480 - 107);
    }

    #[test]
    fn generic_objects_ordered_by_confidence() {
        let mut low = entity("cup", Category::Generic("cup".into()), 10, 100);
        low.detection.confidence = 0.2;
        let mut high = entity("dog", Category::Generic("dog".into()), 10, 100);
        high.detection.confidence = 0.9;
        let set = TrackedSet::build(vec![low, high], 5);
        assert_eq!(set.objects[0].detection.raw_label, "dog");
        assert!(set.vehicles.is_empty());
    }
}
