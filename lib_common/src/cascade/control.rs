//! # Resource Control Boundary
//!
//! The three calls the cascade engine needs from whatever actually manages
//! resources: issue a command, read the current state, list dependents.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Stop,
    Restart,
}

impl CommandKind {
    /// State a resource must reach for the command to count as confirmed.
    pub fn expected_state(&self) -> ResourceState {
        match self {
            CommandKind::Start | CommandKind::Restart => ResourceState::Running,
            CommandKind::Stop => ResourceState::Stopped,
        }
    }

    pub fn is_stop_class(&self) -> bool {
        matches!(self, CommandKind::Stop)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Restart => "restart",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(CommandKind::Start),
            "stop" => Ok(CommandKind::Stop),
            "restart" => Ok(CommandKind::Restart),
            other => Err(ControlError::UnsupportedCommand(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Running,
    Stopped,
    Paused,
    Restarting,
    /// Failed for good; will not come back without intervention.
    Dead,
    /// The resource no longer exists.
    Missing,
    Unknown(String),
}

impl ResourceState {
    /// States that end a stop-class confirmation early.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, ResourceState::Dead | ResourceState::Missing)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Running => f.write_str("running"),
            ResourceState::Stopped => f.write_str("stopped"),
            ResourceState::Paused => f.write_str("paused"),
            ResourceState::Restarting => f.write_str("restarting"),
            ResourceState::Dead => f.write_str("dead"),
            ResourceState::Missing => f.write_str("missing"),
            ResourceState::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

/// What the control primitive said when handed a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandAck {
    pub accepted: bool,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("resource `{0}` not found")]
    NotFound(String),

    #[error("`{command}` on `{resource_id}` refused: {reason}")]
    Refused {
        resource_id: String,
        command: CommandKind,
        reason: String,
    },

    #[error("unsupported command `{0}`")]
    UnsupportedCommand(String),

    #[error("control backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ResourceControl: Send + Sync {
    async fn issue_command(
        &self,
        resource_id: &str,
        command: CommandKind,
    ) -> Result<CommandAck, ControlError>;

    async fn query_state(&self, resource_id: &str) -> Result<ResourceState, ControlError>;

    /// Dependents of `resource_id` in declaration order. With
    /// `only_auto_start` set, only those eligible for automatic start.
    async fn list_dependents(
        &self,
        resource_id: &str,
        only_auto_start: bool,
    ) -> Result<Vec<String>, ControlError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!("Stop".parse::<CommandKind>().unwrap(), CommandKind::Stop);
        assert_eq!("restart".parse::<CommandKind>().unwrap(), CommandKind::Restart);
        assert!("kill".parse::<CommandKind>().is_err());
    }

    #[test]
    fn expected_states() {
        assert_eq!(CommandKind::Start.expected_state(), ResourceState::Running);
        assert_eq!(CommandKind::Restart.expected_state(), ResourceState::Running);
        assert_eq!(CommandKind::Stop.expected_state(), ResourceState::Stopped);
        assert!(ResourceState::Missing.is_terminal_failure());
        assert!(!ResourceState::Paused.is_terminal_failure());
    }
}
