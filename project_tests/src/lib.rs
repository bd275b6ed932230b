//! Test doubles shared by the scenario tests under `tests/`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use lib_common::cascade::{CommandAck, CommandKind, ControlError, ResourceControl, ResourceState};
use lib_common::configs::DependencyMap;
use lib_common::core::{MetricProducer, ProducerError};

/// Producer whose every snapshot is `{ "call": n }`, `n` counting from 1.
#[derive(Debug, Default)]
pub struct CountingProducer {
    calls: AtomicU64,
}

impl CountingProducer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricProducer for CountingProducer {
    async fn produce(&self) -> Result<Value, ProducerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "call": n }))
    }
}

/// In-memory resource backend.
///
/// Accepted commands move the resource to the command's expected state at
/// once, unless the resource is marked stuck. Resources marked failing reject
/// every command with a backend error.
pub struct ScriptedControl {
    dependencies: DependencyMap,
    states: Mutex<HashMap<String, ResourceState>>,
    stuck: HashSet<String>,
    failing: HashSet<String>,
    issued: Mutex<Vec<(String, CommandKind, Instant)>>,
}

impl ScriptedControl {
    pub fn new(dependencies: DependencyMap) -> Self {
        Self {
            dependencies,
            states: Mutex::new(HashMap::new()),
            stuck: HashSet::new(),
            failing: HashSet::new(),
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn stuck(mut self, resource_id: &str) -> Self {
        self.stuck.insert(resource_id.to_string());
        self
    }

    pub fn failing(mut self, resource_id: &str) -> Self {
        self.failing.insert(resource_id.to_string());
        self
    }

    pub fn with_state(self, resource_id: &str, state: ResourceState) -> Self {
        self.states
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), state);
        self
    }

    /// Every command received so far, in arrival order.
    pub fn issued(&self) -> Vec<(String, CommandKind, Instant)> {
        self.issued.lock().unwrap().clone()
    }

    pub fn issued_to(&self, resource_id: &str) -> Vec<(CommandKind, Instant)> {
        self.issued()
            .into_iter()
            .filter(|(id, _, _)| id == resource_id)
            .map(|(_, command, at)| (command, at))
            .collect()
    }
}

#[async_trait]
impl ResourceControl for ScriptedControl {
    async fn issue_command(&self, resource_id: &str, command: CommandKind) -> Result<CommandAck, ControlError> {
        self.issued
            .lock()
            .unwrap()
            .push((resource_id.to_string(), command, Instant::now()));

        if self.failing.contains(resource_id) {
            return Err(ControlError::Backend(format!("{resource_id} is unreachable")));
        }
        if !self.stuck.contains(resource_id) {
            self.states
                .lock()
                .unwrap()
                .insert(resource_id.to_string(), command.expected_state());
        }
        Ok(CommandAck {
            accepted: true,
            detail: format!("{command} {resource_id}"),
        })
    }

    async fn query_state(&self, resource_id: &str) -> Result<ResourceState, ControlError> {
        self.states
            .lock()
            .unwrap()
            .get(resource_id)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(resource_id.to_string()))
    }

    async fn list_dependents(&self, resource_id: &str, only_auto_start: bool) -> Result<Vec<String>, ControlError> {
        Ok(self.dependencies.dependents(resource_id, only_auto_start))
    }
}
