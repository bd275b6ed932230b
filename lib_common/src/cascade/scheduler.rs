//! # Dependent-Action Cascade
//!
//! Re-issues a primary's command against its declared dependents. Stop goes
//! to every dependent immediately; start and restart go only to auto-start
//! dependents, and not before a delay measured from the primary's
//! acceptance. Dependents are handled one at a time in declaration order; a
//! failure is recorded and the next dependent is still attempted. Nothing is
//! retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::cascade::control::{CommandAck, CommandKind, ControlError, ResourceControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadePolicy {
    pub start_delay: Duration,
    pub stop_delay: Duration,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(10),
            stop_delay: Duration::ZERO,
        }
    }
}

impl CascadePolicy {
    pub fn delay_for(&self, command: CommandKind) -> Duration {
        if command.is_stop_class() {
            self.stop_delay
        } else {
            self.start_delay
        }
    }
}

/// One planned cascade, derived from the dependency declaration per command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentAction {
    pub primary_resource_id: String,
    pub command: CommandKind,
    pub dependent_resource_ids: Vec<String>,
    pub dispatch_delay: Duration,
}

/// Result of re-issuing the command to one dependent.
#[derive(Debug)]
pub struct DependentDispatch {
    pub resource_id: String,
    pub result: Result<CommandAck, ControlError>,
}

impl DependentDispatch {
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(ack) if ack.accepted)
    }
}

pub struct CascadeScheduler {
    control: Arc<dyn ResourceControl>,
    policy: CascadePolicy,
}

impl CascadeScheduler {
    pub fn new(control: Arc<dyn ResourceControl>, policy: CascadePolicy) -> Self {
        Self { control, policy }
    }

    pub fn policy(&self) -> CascadePolicy {
        self.policy
    }

    pub async fn plan(
        &self,
        primary_resource_id: &str,
        command: CommandKind,
    ) -> Result<DependentAction, ControlError> {
        let only_auto_start = !command.is_stop_class();
        let dependents = self
            .control
            .list_dependents(primary_resource_id, only_auto_start)
            .await?;

        Ok(DependentAction {
            primary_resource_id: primary_resource_id.to_string(),
            command,
            dependent_resource_ids: dependents,
            dispatch_delay: self.policy.delay_for(command),
        })
    }

    /// Waits until `accepted_at + dispatch_delay`, then dispatches.
    pub async fn dispatch(&self, action: &DependentAction, accepted_at: Instant) -> Vec<DependentDispatch> {
        if action.dependent_resource_ids.is_empty() {
            return Vec::new();
        }
        sleep_until(accepted_at + action.dispatch_delay).await;

        let mut results = Vec::with_capacity(action.dependent_resource_ids.len());
        for resource_id in &action.dependent_resource_ids {
            let result = self.control.issue_command(resource_id, action.command).await;
            match &result {
                Ok(ack) if ack.accepted => {
                    tracing::info!(primary = %action.primary_resource_id, resource_id = %resource_id, command = %action.command, "dependent dispatched");
                }
                Ok(ack) => {
                    tracing::warn!(primary = %action.primary_resource_id, resource_id = %resource_id, command = %action.command, detail = %ack.detail, "dependent refused command");
                }
                Err(e) => {
                    tracing::warn!(primary = %action.primary_resource_id, resource_id = %resource_id, command = %action.command, error = %e, "dependent dispatch failed");
                }
            }
            results.push(DependentDispatch {
                resource_id: resource_id.clone(),
                result,
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::control::ResourceState;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        issued: Mutex<Vec<(String, CommandKind, Instant)>>,
    }

    #[async_trait]
    impl ResourceControl for Recorder {
        async fn issue_command(&self, id: &str, command: CommandKind) -> Result<CommandAck, ControlError> {
            self.issued.lock().unwrap().push((id.to_string(), command, Instant::now()));
            if id == "broken" {
                return Err(ControlError::Backend("daemon unreachable".into()));
            }
            Ok(CommandAck { accepted: true, detail: id.to_string() })
        }

        async fn query_state(&self, _: &str) -> Result<ResourceState, ControlError> {
            Ok(ResourceState::Running)
        }

        async fn list_dependents(&self, _: &str, only_auto_start: bool) -> Result<Vec<String>, ControlError> {
            if only_auto_start {
                Ok(vec!["db".into()])
            } else {
                Ok(vec!["db".into(), "broken".into(), "cache".into()])
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_plans_every_dependent_without_delay() {
        let control = Arc::new(Recorder::default());
        let scheduler = CascadeScheduler::new(control.clone(), CascadePolicy::default());
        let action = scheduler.plan("web", CommandKind::Stop).await.unwrap();
        assert_eq!(action.dependent_resource_ids, vec!["db", "broken", "cache"]);
        assert_eq!(action.dispatch_delay, Duration::ZERO);

        let started = Instant::now();
        let results = scheduler.dispatch(&action, started).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].succeeded());
        assert!(!results[1].succeeded());
        assert!(results[2].succeeded());
        assert_eq!(started.elapsed(), Duration::ZERO);

        let order: Vec<String> = control.issued.lock().unwrap().iter().map(|(id, _, _)| id.clone()).collect();
        assert_eq!(order, vec!["db", "broken", "cache"]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_from_acceptance() {
        let control = Arc::new(Recorder::default());
        let scheduler = CascadeScheduler::new(control.clone(), CascadePolicy::default());
        let accepted_at = Instant::now();
        tokio::time::advance(Duration::from_secs(3)).await;

        let action = scheduler.plan("web", CommandKind::Start).await.unwrap();
        assert_eq!(action.dependent_resource_ids, vec!["db"]);
        scheduler.dispatch(&action, accepted_at).await;

        let issued = control.issued.lock().unwrap();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].2 - accepted_at, Duration::from_secs(10));
    }
}
