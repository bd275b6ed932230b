//! # State Confirmation
//!
//! After a command is accepted the resource is polled until it reports the
//! expected state, a terminal state the policy accepts, or the attempt budget
//! runs out. Running out is not an error; the caller decides what a timeout
//! means. There is no external cancel.

use std::time::Duration;

use tokio::time::sleep;

use crate::cascade::control::{CommandKind, ResourceControl, ResourceState};

pub const DEFAULT_ATTEMPTS: u32 = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateConfirmationRequest {
    pub resource_id: String,
    pub expected_state: ResourceState,
    /// Whether a terminal failure state also ends the wait successfully.
    pub accept_terminal: bool,
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl StateConfirmationRequest {
    pub fn for_command(resource_id: impl Into<String>, command: CommandKind) -> Self {
        Self {
            resource_id: resource_id.into(),
            expected_state: command.expected_state(),
            accept_terminal: command.is_stop_class(),
            max_attempts: DEFAULT_ATTEMPTS,
            poll_interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_budget(mut self, max_attempts: u32, poll_interval: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed {
        attempts: u32,
    },
    /// A terminal state accepted by the stop-class policy.
    TerminalState {
        state: ResourceState,
        attempts: u32,
    },
    TimedOut {
        attempts: u32,
        last_observed: Option<ResourceState>,
    },
}

impl ConfirmationOutcome {
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, ConfirmationOutcome::TimedOut { .. })
    }
}

/// Polls `control` until the request resolves. Each attempt waits one
/// interval first, so a full budget spans `max_attempts * poll_interval`.
pub async fn confirm_state(
    control: &dyn ResourceControl,
    request: &StateConfirmationRequest,
) -> ConfirmationOutcome {
    let mut last_observed = None;

    for attempt in 1..=request.max_attempts {
        sleep(request.poll_interval).await;

        let state = match control.query_state(&request.resource_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!(resource_id = %request.resource_id, attempt, error = %e, "state query failed");
                continue;
            }
        };

        if state == request.expected_state {
            return ConfirmationOutcome::Confirmed { attempts: attempt };
        }
        if request.accept_terminal && state.is_terminal_failure() {
            return ConfirmationOutcome::TerminalState {
                state,
                attempts: attempt,
            };
        }
        last_observed = Some(state);
    }

    ConfirmationOutcome::TimedOut {
        attempts: request.max_attempts,
        last_observed,
    }
}
