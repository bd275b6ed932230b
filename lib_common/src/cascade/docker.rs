//! # Docker CLI Control
//!
//! [`ResourceControl`] backed by the `docker` binary. Commands run through
//! `tokio::process::Command`; dependents come from a static
//! [`DependencyMap`].

use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use crate::cascade::control::{CommandAck, CommandKind, ControlError, ResourceControl, ResourceState};
use crate::configs::DependencyMap;

pub struct DockerControl {
    docker_bin: String,
    dependencies: DependencyMap,
}

impl DockerControl {
    pub fn new(docker_bin: impl Into<String>, dependencies: DependencyMap) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            dependencies,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, ControlError> {
        let mut command = Command::new(&self.docker_bin);
        command.args(args);
        tracing::trace!("Executing command: {:?}", command);
        command
            .output()
            .await
            .map_err(|e| ControlError::Backend(format!("failed to execute {}: {e}", self.docker_bin)))
    }
}

/// Maps `docker inspect` `.State.Status` to a resource state.
pub fn parse_docker_state(raw: &str) -> ResourceState {
    match raw.trim() {
        "running" => ResourceState::Running,
        "exited" | "created" => ResourceState::Stopped,
        "paused" => ResourceState::Paused,
        "restarting" => ResourceState::Restarting,
        "dead" => ResourceState::Dead,
        other => ResourceState::Unknown(other.to_string()),
    }
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such object") || stderr.contains("No such container")
}

#[async_trait]
impl ResourceControl for DockerControl {
    async fn issue_command(
        &self,
        resource_id: &str,
        command: CommandKind,
    ) -> Result<CommandAck, ControlError> {
        let output = self.run(&[command.as_str(), resource_id]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            return Ok(CommandAck {
                accepted: true,
                detail: stdout,
            });
        }
        if is_missing(&stderr) {
            return Err(ControlError::NotFound(resource_id.to_string()));
        }
        Err(ControlError::Refused {
            resource_id: resource_id.to_string(),
            command,
            reason: stderr,
        })
    }

    async fn query_state(&self, resource_id: &str) -> Result<ResourceState, ControlError> {
        let output = self
            .run(&["inspect", "-f", "{{.State.Status}}", resource_id])
            .await?;
        if output.status.success() {
            return Ok(parse_docker_state(&String::from_utf8_lossy(&output.stdout)));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing(&stderr) {
            return Ok(ResourceState::Missing);
        }
        Err(ControlError::Backend(stderr.trim().to_string()))
    }

    async fn list_dependents(
        &self,
        resource_id: &str,
        only_auto_start: bool,
    ) -> Result<Vec<String>, ControlError> {
        Ok(self.dependencies.dependents(resource_id, only_auto_start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::DependentDecl;

    #[test]
    fn maps_docker_states() {
        assert_eq!(parse_docker_state("running\n"), ResourceState::Running);
        assert_eq!(parse_docker_state("exited"), ResourceState::Stopped);
        assert_eq!(parse_docker_state("created"), ResourceState::Stopped);
        assert_eq!(parse_docker_state("dead"), ResourceState::Dead);
        assert_eq!(parse_docker_state("removing"), ResourceState::Unknown("removing".into()));
    }

    #[test]
    fn recognises_missing_objects() {
        assert!(is_missing("Error: No such object: web"));
        assert!(is_missing("Error response from daemon: No such container: web"));
        assert!(!is_missing("permission denied"));
    }

    #[tokio::test]
    async fn dependents_come_from_declarations() {
        let deps = DependencyMap::new().with_dependents(
            "web",
            vec![
                DependentDecl { id: "worker".into(), auto_start: true },
                DependentDecl { id: "cron".into(), auto_start: false },
            ],
        );
        let control = DockerControl::new("docker", deps);
        assert_eq!(control.list_dependents("web", true).await.unwrap(), vec!["worker"]);
        assert_eq!(control.list_dependents("web", false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_binary_is_a_backend_error() {
        let control = DockerControl::new("/nonexistent/docker-bin", DependencyMap::new());
        let err = control.query_state("web").await.unwrap_err();
        assert!(matches!(err, ControlError::Backend(_)));
    }
}
