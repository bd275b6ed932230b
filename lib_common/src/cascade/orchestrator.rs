//! # Command Orchestrator
//!
//! Runs one state-changing command end to end:
//!
//! ```text
//! Issued -> Accepted -> Confirming -> {Confirmed | TimedOut} -> CascadeDispatched -> Done
//! Issued -> Done                      (acceptance failed)
//! ```
//!
//! The caller only waits for acceptance. Confirmation and the cascade run in
//! a spawned task whose [`FollowUpReport`] can be awaited through the ticket.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cascade::confirm::{
    confirm_state, ConfirmationOutcome, StateConfirmationRequest, DEFAULT_ATTEMPTS, DEFAULT_INTERVAL,
};
use crate::cascade::control::{CommandAck, CommandKind, ControlError, ResourceControl};
use crate::cascade::scheduler::{CascadePolicy, CascadeScheduler, DependentDispatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    Issued,
    Accepted,
    Confirming,
    Confirmed,
    TimedOut,
    CascadeDispatched,
    Done,
}

impl fmt::Display for CommandPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandPhase::Issued => "issued",
            CommandPhase::Accepted => "accepted",
            CommandPhase::Confirming => "confirming",
            CommandPhase::Confirmed => "confirmed",
            CommandPhase::TimedOut => "timed-out",
            CommandPhase::CascadeDispatched => "cascade-dispatched",
            CommandPhase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("`{command}` on `{resource_id}` was not accepted: {detail}")]
    Rejected {
        resource_id: String,
        command: CommandKind,
        detail: String,
    },
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Everything that happened after acceptance.
#[derive(Debug)]
pub struct FollowUpReport {
    pub confirmation: ConfirmationOutcome,
    pub cascade: Vec<DependentDispatch>,
    /// Set when the dependent list could not be read.
    pub plan_error: Option<ControlError>,
    pub phases: Vec<CommandPhase>,
}

/// Returned to the caller as soon as the command is accepted.
#[derive(Debug)]
pub struct CommandTicket {
    pub resource_id: String,
    pub command: CommandKind,
    pub ack: CommandAck,
    pub accepted_at: Instant,
    pub follow_up: JoinHandle<FollowUpReport>,
}

/// Attempt budget for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationBudget {
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for ConfirmationBudget {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ATTEMPTS,
            poll_interval: DEFAULT_INTERVAL,
        }
    }
}

pub struct CommandOrchestrator {
    control: Arc<dyn ResourceControl>,
    scheduler: Arc<CascadeScheduler>,
    budget: ConfirmationBudget,
}

fn transition(resource_id: &str, command: CommandKind, phase: CommandPhase, phases: &mut Vec<CommandPhase>) {
    tracing::info!(resource_id, %command, %phase, "command phase");
    phases.push(phase);
}

impl CommandOrchestrator {
    pub fn new(control: Arc<dyn ResourceControl>, policy: CascadePolicy, budget: ConfirmationBudget) -> Self {
        let scheduler = Arc::new(CascadeScheduler::new(Arc::clone(&control), policy));
        Self {
            control,
            scheduler,
            budget,
        }
    }

    /// Issues `command` against `resource_id`. Returns once the control
    /// primitive has answered; an acceptance failure ends the invocation.
    pub async fn execute(&self, resource_id: &str, command: CommandKind) -> Result<CommandTicket, CommandError> {
        let mut phases = Vec::new();
        transition(resource_id, command, CommandPhase::Issued, &mut phases);

        let ack = match self.control.issue_command(resource_id, command).await {
            Ok(ack) if ack.accepted => ack,
            Ok(ack) => {
                transition(resource_id, command, CommandPhase::Done, &mut phases);
                return Err(CommandError::Rejected {
                    resource_id: resource_id.to_string(),
                    command,
                    detail: ack.detail,
                });
            }
            Err(e) => {
                transition(resource_id, command, CommandPhase::Done, &mut phases);
                return Err(e.into());
            }
        };
        let accepted_at = Instant::now();
        transition(resource_id, command, CommandPhase::Accepted, &mut phases);

        let request = StateConfirmationRequest::for_command(resource_id, command)
            .with_budget(self.budget.max_attempts, self.budget.poll_interval);
        let control = Arc::clone(&self.control);
        let scheduler = Arc::clone(&self.scheduler);
        let id = resource_id.to_string();

        let follow_up = tokio::spawn(async move {
            transition(&id, command, CommandPhase::Confirming, &mut phases);
            let confirmation = confirm_state(control.as_ref(), &request).await;
            let phase = if confirmation.is_confirmed() {
                CommandPhase::Confirmed
            } else {
                tracing::warn!(resource_id = %id, %command, ?confirmation, "state not confirmed; cascading anyway");
                CommandPhase::TimedOut
            };
            transition(&id, command, phase, &mut phases);

            let (cascade, plan_error) = match scheduler.plan(&id, command).await {
                Ok(action) => (scheduler.dispatch(&action, accepted_at).await, None),
                Err(e) => {
                    tracing::warn!(resource_id = %id, %command, error = %e, "failed to list dependents");
                    (Vec::new(), Some(e))
                }
            };
            transition(&id, command, CommandPhase::CascadeDispatched, &mut phases);
            transition(&id, command, CommandPhase::Done, &mut phases);

            FollowUpReport {
                confirmation,
                cascade,
                plan_error,
                phases,
            }
        });

        Ok(CommandTicket {
            resource_id: resource_id.to_string(),
            command,
            ack,
            accepted_at,
            follow_up,
        })
    }
}
