//! # lib_common
//!
//! The engine behind the telemetry servers. Modules are gated per folder so a
//! binary only compiles what it wires up:
//!
//! - **`core`** (`hub`): tiered cache, channel registry, dispatcher, tiered poller
//!   and the lifecycle controller that ties them together.
//! - **`gateway`** (`hub`): credential verification and per-connection message
//!   handling for the subscribe / unsubscribe / fetch-once protocol.
//! - **`cascade`** (`cascade`): state confirmation after a command and the
//!   dependent-action cascade that follows it.
//! - **`producers`** (`producers`): built-in metric producers.
//! - **`configs`**: cadence profile, credentials file and dependency declarations.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "hub")]
pub mod core;
#[cfg(feature = "hub")]
pub mod gateway;

#[cfg(feature = "cascade")]
pub mod cascade;

#[cfg(feature = "producers")]
pub mod producers;

pub mod configs;

// Re-export the types servers touch most.
#[cfg(feature = "hub")]
pub use crate::core::{
    Dispatcher, LifecycleController, ChannelRegistry, TieredCache, TieredPoller, TopicCatalog,
};
#[cfg(feature = "hub")]
pub use gateway::{Authenticator, ConnectionGateway, Identity, Role};
#[cfg(feature = "cascade")]
pub use cascade::{CommandKind, CommandOrchestrator, ResourceControl};
