//! # Lifecycle Controller
//!
//! Starts a topic's polling loops when its room gains its first member and
//! tears them down, together with the topic's cache entries, when the room
//! empties. The registry cancels the room token while holding its own lock;
//! this controller only keeps the loop handles so they can be listed and
//! aborted.
//!
//! Timer sets are keyed by topic but tagged with the token they were started
//! under. A set is only removed once its token is cancelled, and a set is only
//! installed while its token is still live, so a late start can never leave
//! loops running for a room that no longer exists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::cache::{ReadMode, TieredCache};
use crate::core::dispatcher::{ConnectionId, Dispatcher};
use crate::core::model::ServerMessage;
use crate::core::poller::{MergedRead, TieredPoller};
use crate::core::registry::{ChannelRegistry, JoinOutcome, LeaveOutcome};
use crate::core::topics::{TopicCatalog, TopicSpec};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
}

/// A running polling loop, as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingTimer {
    pub metric_class: String,
    pub period: Duration,
    pub started_at: Instant,
}

struct TimerSet {
    token: CancellationToken,
    timers: Vec<(PollingTimer, JoinHandle<()>)>,
}

impl TimerSet {
    fn abort(self) {
        for (_, handle) in self.timers {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinResult {
    pub topic: Arc<TopicSpec>,
    /// The room was empty before this join and polling has just started.
    pub activated: bool,
    pub already_member: bool,
}

pub struct LifecycleController {
    catalog: Arc<TopicCatalog>,
    registry: Arc<ChannelRegistry>,
    cache: Arc<TieredCache>,
    dispatcher: Arc<Dispatcher>,
    poller: Arc<TieredPoller>,
    timers: Mutex<HashMap<String, TimerSet>>,
}

impl LifecycleController {
    pub fn new(catalog: Arc<TopicCatalog>, dispatcher: Arc<Dispatcher>) -> Self {
        let registry = Arc::new(ChannelRegistry::new());
        let cache = Arc::new(TieredCache::new());
        let poller = Arc::new(TieredPoller::new(
            Arc::clone(&cache),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
        ));
        Self {
            catalog,
            registry,
            cache,
            dispatcher,
            poller,
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &TopicCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn topic(&self, name: &str) -> Result<Arc<TopicSpec>, HubError> {
        self.catalog
            .get(name)
            .ok_or_else(|| HubError::UnknownTopic(name.to_string()))
    }

    /// Adds `conn` to the room of `topic`, starting polling on first join.
    pub fn join(&self, conn: ConnectionId, topic: &str) -> Result<JoinResult, HubError> {
        let spec = self.topic(topic)?;

        let result = match self.registry.join(conn, topic) {
            JoinOutcome::Activated(token) => {
                self.start_polling(&spec, token);
                JoinResult {
                    topic: spec,
                    activated: true,
                    already_member: false,
                }
            }
            JoinOutcome::Joined => JoinResult {
                topic: spec,
                activated: false,
                already_member: false,
            },
            JoinOutcome::AlreadyMember => JoinResult {
                topic: spec,
                activated: false,
                already_member: true,
            },
        };
        Ok(result)
    }

    fn start_polling(&self, spec: &Arc<TopicSpec>, token: CancellationToken) {
        let started_at = Instant::now();
        let timers: Vec<(PollingTimer, JoinHandle<()>)> = spec
            .classes
            .iter()
            .map(|class| {
                let timer = PollingTimer {
                    metric_class: class.name.clone(),
                    period: class.cadence,
                    started_at,
                };
                let handle =
                    self.poller
                        .spawn_class_loop(Arc::clone(spec), class.clone(), token.clone());
                (timer, handle)
            })
            .collect();

        let set = TimerSet { token, timers };
        let mut all = self.timers.lock().expect("Lifecycle lock poisoned");
        if set.token.is_cancelled() {
            set.abort();
            return;
        }
        tracing::info!(topic = %spec.name, classes = set.timers.len(), "polling started");
        if let Some(stale) = all.insert(spec.name.clone(), set) {
            stale.abort();
        }
    }

    /// Removes `conn` from the room of `topic`. The last leave stops polling
    /// and purges the topic's cache entries.
    pub fn leave(&self, conn: ConnectionId, topic: &str) -> LeaveOutcome {
        let outcome = self.registry.leave(conn, topic);
        if outcome == LeaveOutcome::Emptied {
            self.teardown(topic);
        }
        outcome
    }

    fn teardown(&self, topic: &str) {
        let removed = {
            let mut all = self.timers.lock().expect("Lifecycle lock poisoned");
            match all.get(topic) {
                Some(set) if set.token.is_cancelled() => all.remove(topic),
                _ => None,
            }
        };
        if let Some(set) = removed {
            set.abort();
        }
        self.cache.purge_topic(topic);
        tracing::info!(topic, "polling stopped");
    }

    /// Leaves every room `conn` belongs to and drops its queue.
    pub fn disconnect(&self, conn: ConnectionId) {
        for topic in self.registry.topics_of(conn) {
            self.leave(conn, &topic);
        }
        self.dispatcher.remove_client(conn);
        tracing::debug!(conn_id = conn, "connection closed");
    }

    /// Answers `conn` alone with one merged update of every class, plus one
    /// `error` frame per failing class. Nothing is sent if `conn` left the
    /// room while the read was in flight.
    pub async fn send_snapshot(&self, conn: ConnectionId, topic: &TopicSpec, mode: ReadMode) -> bool {
        let merged = self.poller.read_all(topic, mode).await;
        if !self.registry.is_member(conn, &topic.name) {
            return false;
        }
        self.reply_merged(conn, &topic.name, merged);
        true
    }

    /// One-shot read of every class, answered only to `conn`.
    pub async fn fetch_once(&self, conn: ConnectionId, topic: &str) -> Result<(), HubError> {
        let spec = self.topic(topic)?;
        let merged = self.poller.read_all(&spec, ReadMode::Cached).await;
        self.reply_merged(conn, topic, merged);
        Ok(())
    }

    fn reply_merged(&self, conn: ConnectionId, topic: &str, merged: MergedRead) {
        if !merged.data.is_empty() {
            self.dispatcher.send_to(conn, ServerMessage::update(topic, merged.data));
        }
        for (metric_class, error) in merged.failures {
            self.dispatcher.send_to(
                conn,
                ServerMessage::error(Some(topic), format!("{metric_class}: {error}")),
            );
        }
    }

    /// Timers currently running for `topic`.
    pub fn active_timers(&self, topic: &str) -> Vec<PollingTimer> {
        let all = self.timers.lock().expect("Lifecycle lock poisoned");
        all.get(topic)
            .filter(|set| !set.token.is_cancelled())
            .map(|set| {
                set.timers
                    .iter()
                    .filter(|(_, handle)| !handle.is_finished())
                    .map(|(timer, _)| timer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn member_count(&self, topic: &str) -> usize {
        self.registry.member_count(topic)
    }

    /// Stops every topic. Used on server shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<(String, TimerSet)> = {
            let mut all = self.timers.lock().expect("Lifecycle lock poisoned");
            all.drain().collect()
        };
        for (topic, set) in drained {
            set.token.cancel();
            set.abort();
            self.cache.purge_topic(&topic);
        }
    }
}
