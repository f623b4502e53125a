//! Label classification.
//!
//! Maps a detector class label onto a domain category with case-insensitive
//! keyword matching. Matching is by substring, so a keyword embedded in an
//! unrelated word also matches; the detector vocabulary is fixed, which keeps
//! that approximation harmless.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Keywords that always classify as `Category::High`, checked before the
/// priority table.
pub const EMERGENCY_KEYWORDS: &[&str] = &["ambulance", "fire", "police"];

/// Extra emergency keywords configured by default on top of the built-in set.
pub const DEFAULT_CUSTOM_EMERGENCY_KEYWORDS: &[&str] = &["emergency", "patrol", "rescue"];

/// Label that pedestrian mode treats as a pedestrian.
pub const PEDESTRIAN_LABEL: &str = "person";

/// Vehicle priority tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::High => "HIGH",
            Tier::Medium => "MEDIUM",
            Tier::Low => "LOW",
        }
    }
}

/// Which classification rules apply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Vehicle priority classification (optionally with pedestrians).
    #[default]
    Vehicle,
    /// Every label becomes a generic object; vehicle rules are bypassed.
    General,
}

/// Domain category of a detection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    High,
    Medium,
    Low,
    Pedestrian,
    Generic(String),
}

impl Category {
    /// Vehicle tier, if this is a vehicle category.
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Category::High => Some(Tier::High),
            Category::Medium => Some(Tier::Medium),
            Category::Low => Some(Tier::Low),
            Category::Pedestrian | Category::Generic(_) => None,
        }
    }

    pub fn is_vehicle(&self) -> bool {
        self.tier().is_some()
    }

    /// Value written to the `Category` column of the detection log.
    ///
    /// Generic objects carry no priority and log as `N/A`.
    pub fn log_value(&self) -> &'static str {
        match self {
            Category::High => "HIGH",
            Category::Medium => "MEDIUM",
            Category::Low => "LOW",
            Category::Pedestrian => "PEDESTRIAN",
            Category::Generic(_) => "N/A",
        }
    }
}

impl From<Tier> for Category {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::High => Category::High,
            Tier::Medium => Category::Medium,
            Tier::Low => Category::Low,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Generic(label) => write!(f, "GENERIC({})", label),
            other => f.write_str(other.log_value()),
        }
    }
}

/// One row of the priority table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityRule {
    pub keyword: String,
    pub tier: Tier,
}

impl PriorityRule {
    pub fn new(keyword: &str, tier: Tier) -> Self {
        Self {
            keyword: keyword.to_lowercase(),
            tier,
        }
    }
}

/// Default priority table. Iteration order is match order.
pub fn default_priority_table() -> Vec<PriorityRule> {
    [
        ("ambulance", Tier::High),
        ("fire truck", Tier::High),
        ("police", Tier::High),
        ("bus", Tier::Medium),
        ("truck", Tier::Medium),
        ("car", Tier::Low),
        ("motorcycle", Tier::Low),
        ("bicycle", Tier::Low),
        ("motorbike", Tier::Low),
        ("delivery", Tier::Medium),
        ("taxi", Tier::Low),
        ("suv", Tier::Low),
        ("sedan", Tier::Low),
    ]
    .into_iter()
    .map(|(keyword, tier)| PriorityRule::new(keyword, tier))
    .collect()
}

/// Label classifier.
#[derive(Clone, Debug)]
pub struct Classifier {
    mode: DetectionMode,
    pedestrians: bool,
    emergency_keywords: Vec<String>,
    table: Vec<PriorityRule>,
}

impl Classifier {
    pub fn new(mode: DetectionMode, pedestrians: bool) -> Self {
        Self {
            mode,
            pedestrians,
            emergency_keywords: EMERGENCY_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            table: default_priority_table(),
        }
    }

    /// Add emergency keywords on top of the built-in set.
    pub fn with_emergency_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for keyword in keywords {
            let keyword = keyword.as_ref().trim().to_lowercase();
            if !keyword.is_empty() && !self.emergency_keywords.contains(&keyword) {
                self.emergency_keywords.push(keyword);
            }
        }
        self
    }

    /// Replace the priority table.
    pub fn with_priority_table(mut self, table: Vec<PriorityRule>) -> Self {
        self.table = table
            .into_iter()
            .map(|rule| PriorityRule::new(&rule.keyword, rule.tier))
            .collect();
        self
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn pedestrians(&self) -> bool {
        self.pedestrians
    }

    /// Classify a raw detector label. `None` means the detection is dropped.
    pub fn classify(&self, raw_label: &str) -> Option<Category> {
        if self.mode == DetectionMode::General {
            return Some(Category::Generic(raw_label.to_string()));
        }

        let label = raw_label.to_lowercase();
        if self.pedestrians && label == PEDESTRIAN_LABEL {
            return Some(Category::Pedestrian);
        }

        if self
            .emergency_keywords
            .iter()
            .any(|keyword| label.contains(keyword.as_str()))
        {
            return Some(Category::High);
        }

        self.table
            .iter()
            .find(|rule| label.contains(rule.keyword.as_str()))
            .map(|rule| Category::from(rule.tier))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DetectionMode::Vehicle, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_short_circuits_lower_tiers() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("fire truck"), Some(Category::High));
        assert_eq!(classifier.classify("Police Car"), Some(Category::High));
        assert_eq!(classifier.classify("AMBULANCE"), Some(Category::High));
    }

    #[test]
    fn table_is_first_match() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("bus"), Some(Category::Medium));
        assert_eq!(classifier.classify("truck"), Some(Category::Medium));
        assert_eq!(classifier.classify("car"), Some(Category::Low));
        assert_eq!(classifier.classify("motorcycle"), Some(Category::Low));
        assert_eq!(classifier.classify("dog"), None);
    }

    #[test]
    fn table_order_decides_between_overlapping_keywords() {
        let table = vec![
            PriorityRule::new("car", Tier::Low),
            PriorityRule::new("cargo", Tier::Medium),
        ];
        let classifier = Classifier::default().with_priority_table(table);
        assert_eq!(classifier.classify("cargo van"), Some(Category::Low));
    }

    #[test]
    fn custom_emergency_keyword() {
        let classifier = Classifier::default().with_emergency_keywords(["Patrol"]);
        assert_eq!(classifier.classify("patrol bicycle"), Some(Category::High));
    }

    #[test]
    fn custom_emergency_keywords_stay_out_of_the_table() {
        assert!(default_priority_table()
            .iter()
            .all(|rule| !DEFAULT_CUSTOM_EMERGENCY_KEYWORDS.contains(&rule.keyword.as_str())));
        assert_eq!(Classifier::default().classify("delivery van"), Some(Category::Medium));
    }

    #[test]
    fn pedestrians_only_in_pedestrian_mode() {
        let plain = Classifier::new(DetectionMode::Vehicle, false);
        assert_eq!(plain.classify("person"), None);

        let with_peds = Classifier::new(DetectionMode::Vehicle, true);
        assert_eq!(with_peds.classify("Person"), Some(Category::Pedestrian));
        assert_eq!(with_peds.classify("person on bicycle"), Some(Category::Low));
    }

    #[test]
    fn general_mode_bypasses_vehicle_rules() {
        let classifier = Classifier::new(DetectionMode::General, true);
        assert_eq!(
            classifier.classify("ambulance"),
            Some(Category::Generic("ambulance".to_string()))
        );
        assert_eq!(
            classifier.classify("person"),
            Some(Category::Generic("person".to_string()))
        );
    }

    #[test]
    fn log_values() {
        assert_eq!(Category::High.log_value(), "HIGH");
        assert_eq!(Category::Generic("cup".into()).log_value(), "N/A");
        assert_eq!(Category::Generic("cup".into()).to_string(), "GENERIC(cup)");
    }
}
