//! # Tiered Poller
//!
//! One loop per metric class per active topic. Each loop ticks at its class
//! cadence, reads through the cache and fans the snapshot out to the room.
//! Every read is a suspension point, so membership and cancellation are
//! checked again before anything is broadcast.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::cache::{ReadMode, TieredCache};
use crate::core::dispatcher::Dispatcher;
use crate::core::model::ServerMessage;
use crate::core::registry::ChannelRegistry;
use crate::core::topics::{MetricClassSpec, ProducerError, TopicSpec};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Sent to this many connections.
    Broadcast(usize),
    EmptyRoom,
    Cancelled,
    ProducerFailed,
}

/// Every class of a topic read once and merged.
#[derive(Debug, Default)]
pub struct MergedRead {
    pub data: Map<String, Value>,
    pub failures: Vec<(String, ProducerError)>,
}

pub struct TieredPoller {
    cache: Arc<TieredCache>,
    registry: Arc<ChannelRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl TieredPoller {
    pub fn new(
        cache: Arc<TieredCache>,
        registry: Arc<ChannelRegistry>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            cache,
            registry,
            dispatcher,
        }
    }

    /// Starts the scheduled loop of one class. The first tick fires one
    /// cadence from now; the loop ends when `token` is cancelled.
    pub fn spawn_class_loop(
        self: &Arc<Self>,
        topic: Arc<TopicSpec>,
        class: MetricClassSpec,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + class.cadence, class.cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(topic = %topic.name, metric_class = %class.name, cadence_ms = class.cadence.as_millis() as u64, "polling loop started");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if poller.tick(&topic.name, &class, &token).await == TickOutcome::Cancelled {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(topic = %topic.name, metric_class = %class.name, "polling loop stopped");
        })
    }

    /// One scheduled poll of one class.
    pub async fn tick(
        &self,
        topic: &str,
        class: &MetricClassSpec,
        token: &CancellationToken,
    ) -> TickOutcome {
        if token.is_cancelled() {
            return TickOutcome::Cancelled;
        }
        if self.registry.member_count(topic) == 0 {
            return TickOutcome::EmptyRoom;
        }

        let entry = match self.cache.read(topic, class, ReadMode::Cached).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(topic, metric_class = %class.name, error = %e, "producer failed; skipping tick");
                return TickOutcome::ProducerFailed;
            }
        };

        if token.is_cancelled() {
            return TickOutcome::Cancelled;
        }
        let members = self.registry.members(topic);
        if members.is_empty() {
            return TickOutcome::EmptyRoom;
        }

        let mut data = Map::new();
        data.insert(entry.metric_class, entry.value);
        let frame = Arc::new(ServerMessage::update(topic, data));
        let delivered = self.dispatcher.broadcast(&members, frame);
        tracing::trace!(topic, metric_class = %class.name, delivered, "tick broadcast");
        TickOutcome::Broadcast(delivered)
    }

    /// Reads every class of `topic` in parallel and merges the results.
    pub async fn read_all(&self, topic: &TopicSpec, mode: ReadMode) -> MergedRead {
        let reads = topic
            .classes
            .iter()
            .map(|class| self.cache.read(&topic.name, class, mode));
        let results = join_all(reads).await;

        let mut merged = MergedRead::default();
        for (class, result) in topic.classes.iter().zip(results) {
            match result {
                Ok(entry) => {
                    merged.data.insert(entry.metric_class, entry.value);
                }
                Err(e) => {
                    tracing::warn!(topic = %topic.name, metric_class = %class.name, error = %e, "producer failed during merged read");
                    merged.failures.push((class.name.clone(), e));
                }
            }
        }
        merged
    }
}
