//! # Tiered Cache
//!
//! Holds the most recent snapshot per `(topic, metric class)`. Each class has
//! its own TTL. A slot is guarded by an async mutex so that concurrent misses
//! for the same class run the producer once; the waiters then find the fresh
//! entry. A failed producer call leaves the previous entry untouched. Every
//! producer call is bounded by the class's `read_timeout`, so a stuck source
//! turns into an error instead of holding the slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::time::{timeout, Instant};

use crate::core::topics::{MetricClassSpec, ProducerError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    topic: String,
    metric_class: String,
}

impl CacheKey {
    fn new(topic: &str, metric_class: &str) -> Self {
        Self {
            topic: topic.to_string(),
            metric_class: metric_class.to_string(),
        }
    }
}

/// One captured snapshot. Entries are replaced whole, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub metric_class: String,
    pub value: Value,
    pub captured_at: Instant,
}

impl CacheEntry {
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.captured_at) < ttl
    }
}

/// Whether a read may be served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Always call the producer.
    Forced,
    /// Serve a fresh entry when one exists.
    Cached,
}

type Slot = Arc<tokio::sync::Mutex<Option<CacheEntry>>>;

#[derive(Debug, Default)]
pub struct TieredCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl TieredCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, topic: &str, metric_class: &str) -> Slot {
        let mut slots = self.slots.lock().expect("Cache lock poisoned");
        Arc::clone(
            slots
                .entry(CacheKey::new(topic, metric_class))
                .or_default(),
        )
    }

    /// Reads one metric class of `topic`, calling its producer when `mode`
    /// is `Forced` or the cached entry has expired.
    pub async fn read(
        &self,
        topic: &str,
        class: &MetricClassSpec,
        mode: ReadMode,
    ) -> Result<CacheEntry, ProducerError> {
        let slot = self.slot(topic, &class.name);
        let mut guard = slot.lock().await;

        if mode == ReadMode::Cached {
            if let Some(entry) = guard.as_ref() {
                if entry.is_fresh(class.ttl, Instant::now()) {
                    tracing::trace!(topic, metric_class = %class.name, "cache hit");
                    return Ok(entry.clone());
                }
            }
        }

        let value = timeout(class.read_timeout, class.producer.produce())
            .await
            .map_err(|_| ProducerError::Timeout(class.read_timeout))??;
        let entry = CacheEntry {
            metric_class: class.name.clone(),
            value,
            captured_at: Instant::now(),
        };
        *guard = Some(entry.clone());
        tracing::trace!(topic, metric_class = %class.name, ?mode, "cache refreshed");
        Ok(entry)
    }

    /// Returns the stored entry without calling the producer. `None` when the
    /// slot is empty or a read is currently in flight.
    pub fn peek(&self, topic: &str, metric_class: &str) -> Option<CacheEntry> {
        let slot = {
            let slots = self.slots.lock().expect("Cache lock poisoned");
            slots.get(&CacheKey::new(topic, metric_class)).cloned()?
        };
        let guard = slot.try_lock().ok()?;
        guard.clone()
    }

    /// Drops every entry of `topic`. Reads still in flight finish into a
    /// detached slot and are never observed.
    pub fn purge_topic(&self, topic: &str) -> usize {
        let mut slots = self.slots.lock().expect("Cache lock poisoned");
        let before = slots.len();
        slots.retain(|key, _| key.topic != topic);
        let purged = before - slots.len();
        tracing::debug!(topic, purged, "cache purged");
        purged
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("Cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
