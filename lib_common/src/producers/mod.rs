//! # Built-in Metric Producers
//!
//! Host counters through `sysinfo`, pool and container state through their
//! CLIs, and [`default_catalog`] wiring them into the standard topics.

pub mod cli;
pub mod system;

use std::sync::Arc;

use crate::configs::{CadenceProfile, Tier};
use crate::core::topics::{MetricClassSpec, MetricProducer, TopicCatalog, TopicSpec};

pub use cli::{ContainerProducer, ZpoolProducer};
pub use system::{CpuProducer, DiskProducer, MemoryProducer, NetworkProducer, SystemSampler};

fn class(profile: &CadenceProfile, name: &str, tier: Tier, producer: Arc<dyn MetricProducer>) -> MetricClassSpec {
    MetricClassSpec::new(name, profile.cadence(tier), profile.ttl(tier), producer)
}

/// The standard topics: `system-load`, `disk-io`, `pool-status` and
/// `container-events`.
pub fn default_catalog(profile: &CadenceProfile, zpool_bin: &str, docker_bin: &str) -> TopicCatalog {
    let sampler = SystemSampler::new();

    TopicCatalog::new()
        .with_topic(TopicSpec::new(
            "system-load",
            vec![
                class(profile, "cpu", Tier::Fast, Arc::new(CpuProducer(sampler.clone()))),
                class(profile, "memory", Tier::Slow, Arc::new(MemoryProducer(sampler.clone()))),
                class(profile, "network", Tier::Medium, Arc::new(NetworkProducer(sampler.clone()))),
            ],
        ))
        .with_topic(TopicSpec::new(
            "disk-io",
            vec![class(profile, "disks", Tier::Fast, Arc::new(DiskProducer(sampler)))],
        ))
        .with_topic(TopicSpec::new(
            "pool-status",
            vec![class(profile, "pools", Tier::Medium, Arc::new(ZpoolProducer::new(zpool_bin)))],
        ))
        .with_topic(TopicSpec::new(
            "container-events",
            vec![class(profile, "containers", Tier::Slow, Arc::new(ContainerProducer::new(docker_bin)))],
        ))
}
