//! # Topics and Metric Classes
//!
//! A topic (e.g. `system-load`) is a set of metric classes (e.g. `cpu`,
//! `memory`, `network`). Each class carries its own polling cadence, its own
//! cache TTL and the producer that reads it. The catalog is built once at
//! startup and shared read-only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors a metric producer can report. None of them are fatal to polling.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The producer ran but could not produce a snapshot.
    #[error("producer failed: {0}")]
    Failed(String),

    /// An external command exited with a non-zero status.
    #[error("command `{command}` exited with status {status}: {stderr}")]
    ExitStatus {
        command: String,
        status: i32,
        stderr: String,
    },

    /// An external command could not be started at all.
    #[error("failed to execute `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// The producer output could not be turned into JSON.
    #[error("failed to parse producer output: {0}")]
    Parse(String),

    /// The producer did not answer within its class's read bound.
    #[error("producer gave no answer within {0:?}")]
    Timeout(Duration),

    /// A blocking read was cancelled or panicked.
    #[error("blocking read aborted: {0}")]
    Join(String),
}

/// The adapter seam: one call, one snapshot of one metric class.
#[async_trait]
pub trait MetricProducer: Send + Sync {
    /// Reads a fresh snapshot.
    async fn produce(&self) -> Result<Value, ProducerError>;
}

/// One independently timed metric class inside a topic.
#[derive(Clone)]
pub struct MetricClassSpec {
    /// Key under which this class appears in merged payloads.
    pub name: String,
    /// Period of the scheduled polling loop.
    pub cadence: Duration,
    /// How long a cached snapshot is served before a new read is required.
    /// Always strictly shorter than `cadence`.
    pub ttl: Duration,
    /// Upper bound on a single producer call, kept below `cadence` so a
    /// stuck read gives the slot back before the next tick.
    pub read_timeout: Duration,
    /// The data source.
    pub producer: Arc<dyn MetricProducer>,
}

impl MetricClassSpec {
    /// Builds a class, clamping `ttl` below `cadence` so a scheduled tick
    /// never receives a snapshot captured by the previous tick.
    pub fn new(
        name: impl Into<String>,
        cadence: Duration,
        ttl: Duration,
        producer: Arc<dyn MetricProducer>,
    ) -> Self {
        let cadence = cadence.max(Duration::from_millis(1));
        let ttl = if ttl >= cadence { cadence / 2 } else { ttl };
        Self {
            name: name.into(),
            cadence,
            ttl,
            read_timeout: cadence - cadence / 5,
            producer,
        }
    }

    /// Overrides the producer call bound, capped at the cadence.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout.min(self.cadence);
        self
    }
}

impl std::fmt::Debug for MetricClassSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricClassSpec")
            .field("name", &self.name)
            .field("cadence", &self.cadence)
            .field("ttl", &self.ttl)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

/// A topic namespace and its metric classes.
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub classes: Vec<MetricClassSpec>,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, classes: Vec<MetricClassSpec>) -> Self {
        Self {
            name: name.into(),
            classes,
        }
    }

    /// Cadence of every class in milliseconds, as reported in
    /// `subscription-confirmed`.
    pub fn cadences(&self) -> BTreeMap<String, u64> {
        self.classes
            .iter()
            .map(|c| (c.name.clone(), c.cadence.as_millis() as u64))
            .collect()
    }
}

/// All topics the hub serves.
#[derive(Debug, Default, Clone)]
pub struct TopicCatalog {
    topics: HashMap<String, Arc<TopicSpec>>,
}

impl TopicCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a topic, replacing any previous declaration with the same name.
    pub fn with_topic(mut self, topic: TopicSpec) -> Self {
        self.insert(topic);
        self
    }

    pub fn insert(&mut self, topic: TopicSpec) {
        self.topics.insert(topic.name.clone(), Arc::new(topic));
    }

    pub fn get(&self, name: &str) -> Option<Arc<TopicSpec>> {
        self.topics.get(name).cloned()
    }

    /// Topic names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed;

    #[async_trait]
    impl MetricProducer for Fixed {
        async fn produce(&self) -> Result<Value, ProducerError> {
            Ok(json!(1))
        }
    }

    #[test]
    fn ttl_is_clamped_below_cadence() {
        let class = MetricClassSpec::new(
            "cpu",
            Duration::from_secs(1),
            Duration::from_secs(5),
            Arc::new(Fixed),
        );
        assert!(class.ttl < class.cadence);
        assert_eq!(class.ttl, Duration::from_millis(500));
    }

    #[test]
    fn read_timeout_stays_below_cadence() {
        let class = MetricClassSpec::new("cpu", Duration::from_secs(1), Duration::from_millis(500), Arc::new(Fixed));
        assert_eq!(class.read_timeout, Duration::from_millis(800));

        let capped = class.with_read_timeout(Duration::from_secs(30));
        assert_eq!(capped.read_timeout, Duration::from_secs(1));
    }

    #[test]
    fn cadences_are_reported_in_millis() {
        let topic = TopicSpec::new(
            "system-load",
            vec![
                MetricClassSpec::new("cpu", Duration::from_secs(1), Duration::from_millis(500), Arc::new(Fixed)),
                MetricClassSpec::new("network", Duration::from_secs(8), Duration::from_secs(4), Arc::new(Fixed)),
            ],
        );
        let cadences = topic.cadences();
        assert_eq!(cadences.get("cpu"), Some(&1000));
        assert_eq!(cadences.get("network"), Some(&8000));
    }

    #[test]
    fn catalog_lists_sorted_names() {
        let catalog = TopicCatalog::new()
            .with_topic(TopicSpec::new("pool-status", vec![]))
            .with_topic(TopicSpec::new("disk-io", vec![]));
        assert_eq!(catalog.names(), vec!["disk-io", "pool-status"]);
        assert!(catalog.get("missing").is_none());
    }
}
