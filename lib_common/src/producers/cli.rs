//! Producers that shell out to a CLI and parse its output.
//!
//! A command that outlives its time limit is killed and reported as
//! [`ProducerError::Timeout`]. The child is also killed when the read is
//! dropped, e.g. when the polling loop of its topic is aborted.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::topics::{MetricProducer, ProducerError};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

async fn run(bin: &str, args: &[&str], limit: Duration) -> Result<String, ProducerError> {
    let rendered = format!("{bin} {}", args.join(" "));
    let child = Command::new(bin).args(args).kill_on_drop(true).output();
    let output = timeout(limit, child)
        .await
        .map_err(|_| {
            tracing::warn!(command = %rendered, ?limit, "command timed out; killed");
            ProducerError::Timeout(limit)
        })?
        .map_err(|e| ProducerError::Spawn {
            command: rendered.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ProducerError::ExitStatus {
            command: rendered,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    String::from_utf8(output.stdout).map_err(|e| ProducerError::Parse(e.to_string()))
}

/// Parses `zpool list -H -p -o name,size,alloc,free,health`.
pub fn parse_zpool_list(raw: &str) -> Result<Value, ProducerError> {
    let mut pools = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let [name, size, alloc, free, health] = fields[..] else {
            return Err(ProducerError::Parse(format!("unexpected zpool row: {line}")));
        };
        let number = |field: &str| {
            field
                .parse::<u64>()
                .map_err(|e| ProducerError::Parse(format!("bad number `{field}` in zpool row: {e}")))
        };
        pools.push(json!({
            "name": name,
            "size": number(size)?,
            "alloc": number(alloc)?,
            "free": number(free)?,
            "health": health,
        }));
    }
    Ok(Value::Array(pools))
}

/// Parses `docker ps -a --format '{{json .}}'`, one JSON object per line.
pub fn parse_docker_ps(raw: &str) -> Result<Value, ProducerError> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| serde_json::from_str::<Value>(line).map_err(|e| ProducerError::Parse(e.to_string())))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

pub struct ZpoolProducer {
    bin: String,
    limit: Duration,
}

impl ZpoolProducer {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            limit: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait]
impl MetricProducer for ZpoolProducer {
    async fn produce(&self) -> Result<Value, ProducerError> {
        let raw = run(
            &self.bin,
            &["list", "-H", "-p", "-o", "name,size,alloc,free,health"],
            self.limit,
        )
        .await?;
        parse_zpool_list(&raw)
    }
}

pub struct ContainerProducer {
    bin: String,
    limit: Duration,
}

impl ContainerProducer {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            limit: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait]
impl MetricProducer for ContainerProducer {
    async fn produce(&self) -> Result<Value, ProducerError> {
        let raw = run(&self.bin, &["ps", "-a", "--format", "{{json .}}"], self.limit).await?;
        parse_docker_ps(&raw)
    }
}
