//! Host counters read through `sysinfo`.
//!
//! All producers share one `System` so CPU usage and network deltas are
//! computed against the previous refresh. Refreshes block, so they run on the
//! blocking pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};

use crate::core::topics::{MetricProducer, ProducerError};

/// Shared handle to the host's `System`.
#[derive(Clone)]
pub struct SystemSampler {
    sys: Arc<Mutex<System>>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_networks_list();
        sys.refresh_disks_list();
        Self {
            sys: Arc::new(Mutex::new(sys)),
        }
    }

    async fn with<F>(&self, read: F) -> Result<Value, ProducerError>
    where
        F: FnOnce(&mut System) -> Value + Send + 'static,
    {
        let sys = Arc::clone(&self.sys);
        tokio::task::spawn_blocking(move || -> Result<Value, ProducerError> {
            let mut guard = sys
                .lock()
                .map_err(|e| ProducerError::Failed(format!("sampler lock poisoned: {e}")))?;
            Ok(read(&mut guard))
        })
        .await
        .map_err(|e| ProducerError::Join(e.to_string()))?
    }
}

pub struct CpuProducer(pub SystemSampler);

#[async_trait]
impl MetricProducer for CpuProducer {
    async fn produce(&self) -> Result<Value, ProducerError> {
        self.0
            .with(|sys| {
                sys.refresh_cpu();
                let load = sys.load_average();
                let cores: Vec<f32> = sys.cpus().iter().map(|c| c.cpu_usage()).collect();
                json!({
                    "usage": sys.global_cpu_info().cpu_usage(),
                    "cores": cores,
                    "load": [load.one, load.five, load.fifteen],
                })
            })
            .await
    }
}

pub struct MemoryProducer(pub SystemSampler);

#[async_trait]
impl MetricProducer for MemoryProducer {
    async fn produce(&self) -> Result<Value, ProducerError> {
        self.0
            .with(|sys| {
                sys.refresh_memory();
                json!({
                    "total": sys.total_memory(),
                    "used": sys.used_memory(),
                    "available": sys.available_memory(),
                    "swapTotal": sys.total_swap(),
                    "swapUsed": sys.used_swap(),
                })
            })
            .await
    }
}

/// Per-interface byte deltas since the previous read.
pub struct NetworkProducer(pub SystemSampler);

#[async_trait]
impl MetricProducer for NetworkProducer {
    async fn produce(&self) -> Result<Value, ProducerError> {
        self.0
            .with(|sys| {
                sys.refresh_networks();
                let interfaces: serde_json::Map<String, Value> = sys
                    .networks()
                    .iter()
                    .map(|(name, data)| {
                        (
                            name.clone(),
                            json!({ "rx": data.received(), "tx": data.transmitted() }),
                        )
                    })
                    .collect();
                Value::Object(interfaces)
            })
            .await
    }
}

pub struct DiskProducer(pub SystemSampler);

#[async_trait]
impl MetricProducer for DiskProducer {
    async fn produce(&self) -> Result<Value, ProducerError> {
        self.0
            .with(|sys| {
                sys.refresh_disks();
                let disks: Vec<Value> = sys
                    .disks()
                    .iter()
                    .map(|d| {
                        json!({
                            "mount": d.mount_point().to_string_lossy(),
                            "name": d.name().to_string_lossy(),
                            "total": d.total_space(),
                            "available": d.available_space(),
                        })
                    })
                    .collect();
                Value::Array(disks)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_snapshot_has_totals() {
        let value = MemoryProducer(SystemSampler::new()).produce().await.unwrap();
        assert!(value["total"].as_u64().is_some());
        assert!(value["used"].as_u64().is_some());
    }

    #[tokio::test]
    async fn cpu_snapshot_has_three_load_averages() {
        let value = CpuProducer(SystemSampler::new()).produce().await.unwrap();
        assert_eq!(value["load"].as_array().map(Vec::len), Some(3));
    }
}
