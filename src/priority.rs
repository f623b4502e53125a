//! Priority aggregation and debounce.
//!
//! Each processed frame reduces its tracked vehicles to one priority level.
//! A command goes to the actuator only when that level differs from the
//! current one. The current level lives in a `PriorityCell` owned by the
//! pipeline run: the aggregator is its only writer, any number of readers
//! (status line, control surface) may hold clones.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::actuator::Actuator;
use crate::classify::Tier;
use crate::rank::ClassifiedEntity;

/// Externally visible priority level.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Priority {
    /// Actuator color for this level.
    pub fn color(&self) -> &'static str {
        match self {
            Priority::High => "red",
            Priority::Medium => "yellow",
            Priority::Low => "green",
            Priority::None => "off",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
            Priority::None => "NONE",
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            3 => Priority::High,
            2 => Priority::Medium,
            1 => Priority::Low,
            _ => Priority::None,
        }
    }
}

impl From<Tier> for Priority {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::High => Priority::High,
            Tier::Medium => Priority::Medium,
            Tier::Low => Priority::Low,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to the current priority of a pipeline run.
#[derive(Clone, Debug, Default)]
pub struct PriorityCell(Arc<AtomicU8>);

impl PriorityCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Priority {
        Priority::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, priority: Priority) {
        self.0.store(priority.to_u8(), Ordering::Release);
    }
}

/// Reduce the tracked vehicles of one frame to a priority level.
pub fn reduce<'a, I>(vehicles: I) -> Priority
where
    I: IntoIterator<Item = &'a ClassifiedEntity>,
{
    vehicles
        .into_iter()
        .filter_map(|entity| entity.category.tier())
        .map(Priority::from)
        .max()
        .unwrap_or(Priority::None)
}

/// Counters for the aggregator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub transitions: u64,
    pub actuator_failures: u64,
}

pub struct PriorityAggregator {
    cell: PriorityCell,
    actuator: Box<dyn Actuator>,
    stats: AggregatorStats,
}

impl PriorityAggregator {
    pub fn new(actuator: Box<dyn Actuator>) -> Self {
        Self::with_cell(PriorityCell::new(), actuator)
    }

    pub fn with_cell(cell: PriorityCell, actuator: Box<dyn Actuator>) -> Self {
        Self {
            cell,
            actuator,
            stats: AggregatorStats::default(),
        }
    }

    pub fn current(&self) -> Priority {
        self.cell.get()
    }

    pub fn cell(&self) -> PriorityCell {
        self.cell.clone()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Advance the state machine with one frame's tracked vehicles.
    ///
    /// Returns the new level when it changed (and a command was issued).
    pub fn observe(&mut self, vehicles: &[ClassifiedEntity]) -> Option<Priority> {
        let next = reduce(vehicles);
        let current = self.cell.get();
        if next == current {
            return None;
        }

        self.cell.set(next);
        self.stats.transitions += 1;
        log::info!("priority {} -> {} ({})", current, next, next.color());

        if let Err(e) = self.actuator.send(next) {
            self.stats.actuator_failures += 1;
            log::debug!(
                "actuator {} dropped {} command: {:#}",
                self.actuator.name(),
                next.color(),
                e
            );
        }
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::RecordingActuator;
    use crate::classify::Category;
    use crate::detect::{BoundingBox, Detection};

    fn vehicle(category: Category) -> ClassifiedEntity {
        let detection = Detection {
            bbox: BoundingBox::new(0, 0, 10, 10),
            confidence: 0.9,
            raw_label: "vehicle".to_string(),
        };
        ClassifiedEntity::new(detection, category, 100)
    }

    #[test]
    fn reduce_takes_highest_tier() {
        assert_eq!(reduce(&[]), Priority::None);
        assert_eq!(
            reduce(&[vehicle(Category::Low), vehicle(Category::Medium)]),
            Priority::Medium
        );
        assert_eq!(
            reduce(&[vehicle(Category::High), vehicle(Category::Low)]),
            Priority::High
        );
        assert_eq!(reduce(&[vehicle(Category::Pedestrian)]), Priority::None);
    }

    #[test]
    fn repeated_levels_are_debounced() {
        let recorder = RecordingActuator::new();
        let mut agg = PriorityAggregator::new(Box::new(recorder.clone()));

        assert_eq!(agg.observe(&[vehicle(Category::Low)]), Some(Priority::Low));
        assert_eq!(agg.observe(&[vehicle(Category::Low)]), None);
        assert_eq!(agg.observe(&[vehicle(Category::Low)]), None);
        assert_eq!(agg.observe(&[]), Some(Priority::None));
        assert_eq!(agg.observe(&[]), None);

        assert_eq!(recorder.commands(), vec![Priority::Low, Priority::None]);
    }

    #[test]
    fn actuator_failure_does_not_roll_back_state() {
        let recorder = RecordingActuator::failing();
        let mut agg = PriorityAggregator::new(Box::new(recorder.clone()));

        assert_eq!(agg.observe(&[vehicle(Category::High)]), Some(Priority::High));
        assert_eq!(agg.current(), Priority::High);
        assert_eq!(agg.stats().actuator_failures, 1);
        assert_eq!(agg.observe(&[vehicle(Category::High)]), None);
    }

    #[test]
    fn cell_readers_observe_writes() {
        let mut agg = PriorityAggregator::new(Box::new(RecordingActuator::new()));
        let reader = agg.cell();
        agg.observe(&[vehicle(Category::Medium)]);
        assert_eq!(reader.get(), Priority::Medium);
        assert_eq!(Priority::Medium.color(), "yellow");
    }
}
