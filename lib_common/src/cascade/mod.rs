//! # Cascade Engine
//!
//! What happens after a state-changing command is accepted:
//!
//! - **`control`**: the resource-control boundary (`issue_command`,
//!   `query_state`, `list_dependents`).
//! - **`confirm`**: bounded polling until the resource reports the expected state.
//! - **`scheduler`**: re-issuing the command to declared dependents under the
//!   per-command timing policy.
//! - **`orchestrator`**: the per-invocation state machine tying the three together.
//! - **`docker`**: a control primitive built on the `docker` CLI.

pub mod confirm;
pub mod control;
pub mod docker;
pub mod orchestrator;
pub mod scheduler;

pub use confirm::{confirm_state, ConfirmationOutcome, StateConfirmationRequest};
pub use control::{CommandAck, CommandKind, ControlError, ResourceControl, ResourceState};
pub use docker::DockerControl;
pub use orchestrator::{
    CommandError, CommandOrchestrator, CommandPhase, CommandTicket, ConfirmationBudget,
    FollowUpReport,
};
pub use scheduler::{CascadePolicy, CascadeScheduler, DependentAction, DependentDispatch};
