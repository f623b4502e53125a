//! Time-bounded recognition cache.
//!
//! Keys are spatial identities (`BoundingBox::spatial_key`), so a hit needs
//! the same box on consecutive recognition frames. Negative results are never
//! cached. Expired entries are removed by `purge_expired`, which the
//! scheduler calls on its maintenance cadence; reads never evict.

use anyhow::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::recognize::{TextCandidate, TextQualifier};

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub text: String,
    pub recorded_at: Instant,
}

/// Counters for cache effectiveness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub adapter_failures: u64,
    pub purged: u64,
}

pub struct RecognitionCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    qualifier: TextQualifier,
    stats: CacheStats,
}

impl RecognitionCache {
    pub fn new(ttl: Duration, qualifier: TextQualifier) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            qualifier,
            stats: CacheStats::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Cached text for `key`, or run `recognize` and cache a qualifying result.
    pub fn get_or_recognize<F>(&mut self, key: &str, recognize: F) -> Option<String>
    where
        F: FnOnce() -> Result<Vec<TextCandidate>>,
    {
        self.get_or_recognize_at(key, Instant::now(), recognize)
    }

    /// As `get_or_recognize`, with an explicit notion of "now".
    pub fn get_or_recognize_at<F>(&mut self, key: &str, now: Instant, recognize: F) -> Option<String>
    where
        F: FnOnce() -> Result<Vec<TextCandidate>>,
    {
        if let Some(entry) = self.entries.get(key) {
            if now.saturating_duration_since(entry.recorded_at) < self.ttl {
                self.stats.hits += 1;
                return Some(entry.text.clone());
            }
        }

        self.stats.misses += 1;
        let candidates = match recognize() {
            Ok(candidates) => candidates,
            Err(e) => {
                self.stats.adapter_failures += 1;
                log::warn!("recognition failed for region {}: {:#}", key, e);
                return None;
            }
        };

        let text = self.qualifier.best(&candidates)?;
        log::debug!("recognized {} for region {}", text, key);
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                text: text.clone(),
                recorded_at: now,
            },
        );
        Some(text)
    }

    /// Remove every entry older than the TTL. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.recorded_at) <= ttl);
        let removed = before - self.entries.len();
        self.stats.purged += removed as u64;
        removed
    }
}

impl Default for RecognitionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL, TextQualifier::default())
    }
}
