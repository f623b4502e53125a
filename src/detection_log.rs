//! Append-only detection log.
//!
//! The frame loop is the only writer; the control surface takes snapshots at
//! any time. Records are shared as `Arc<LogRecord>`: appends hold the write
//! lock for one push, snapshots hold the read lock for one refcount bump per
//! record, so a snapshot always reflects whole records and exactly the
//! appends that completed before it.
//!
//! The log is a ring: once `max_entries` records are held, each append
//! evicts the oldest one. A capacity of zero means unbounded.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default ring capacity.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Placeholder written when no text was recognized.
pub const NOT_AVAILABLE: &str = "N/A";

/// One logged detection. Never mutated after it is appended.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub label: String,
    pub category: String,
    pub recognized_text: Option<String>,
    /// Pedestrians in the same frame; only set in pedestrian mode.
    pub pedestrians_nearby: Option<usize>,
}

impl LogRecord {
    pub fn new(label: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            label: label.into(),
            category: category.into(),
            recognized_text: None,
            pedestrians_nearby: None,
        }
    }

    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.recognized_text = text;
        self
    }

    pub fn with_pedestrians(mut self, count: Option<usize>) -> Self {
        self.pedestrians_nearby = count;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn text_or_na(&self) -> &str {
        self.recognized_text.as_deref().unwrap_or(NOT_AVAILABLE)
    }
}

#[derive(Debug, Default)]
struct LogInner {
    records: VecDeque<Arc<LogRecord>>,
    evicted: u64,
}

/// Cloneable handle to a shared detection log.
#[derive(Clone, Debug)]
pub struct DetectionLog {
    inner: Arc<RwLock<LogInner>>,
    max_entries: usize,
}

impl DetectionLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LogInner::default())),
            max_entries,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Append one record. Never blocks on readers for longer than one copy
    /// and never fails.
    pub fn append(&self, record: LogRecord) {
        let record = Arc::new(record);
        let mut inner = self.write();
        if self.max_entries > 0 {
            while inner.records.len() >= self.max_entries {
                inner.records.pop_front();
                inner.evicted += 1;
            }
        }
        inner.records.push_back(record);
    }

    /// Immutable copy of every record currently held, in append order.
    pub fn snapshot(&self) -> Vec<Arc<LogRecord>> {
        self.read().records.iter().map(Arc::clone).collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records dropped by the ring so far.
    pub fn evicted(&self) -> u64 {
        self.read().evicted
    }

    fn read(&self) -> RwLockReadGuard<'_, LogInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DetectionLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_a_copy() {
        let log = DetectionLog::unbounded();
        log.append(LogRecord::new("car", "LOW"));
        let snap = log.snapshot();
        log.append(LogRecord::new("bus", "MEDIUM"));

        assert_eq!(snap.len(), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(snap[0].label, "car");
    }

    #[test]
    fn snapshots_share_records() {
        let log = DetectionLog::unbounded();
        log.append(LogRecord::new("car", "LOW"));
        let first = log.snapshot();
        let second = log.snapshot();

        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(Arc::strong_count(&first[0]), 3);
    }

    #[test]
    fn ring_evicts_oldest() {
        let log = DetectionLog::new(3);
        for label in ["a", "b", "c", "d", "e"] {
            log.append(LogRecord::new(label, "LOW"));
        }
        let labels: Vec<_> = log.snapshot().iter().map(|r| r.label.clone()).collect();
        assert_eq!(labels, vec!["c", "d", "e"]);
        assert_eq!(log.evicted(), 2);
    }

    #[test]
    fn missing_text_renders_na() {
        let record = LogRecord::new("car", "LOW");
        assert_eq!(record.text_or_na(), "N/A");
        let record = record.with_text(Some("AB-1234".into()));
        assert_eq!(record.text_or_na(), "AB-1234");
    }
}
