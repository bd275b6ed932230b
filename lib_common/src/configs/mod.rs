//! # Configuration Modules
//!
//! File-backed configuration the engine consumes at startup: polling cadences,
//! the credentials file and the static dependency declarations.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Cadence and TTL per metric tier.
pub mod cadence;

/// Service tokens and subject records loaded from JSON.
#[cfg(feature = "hub")]
pub mod credentials;

/// Primary → dependents declarations loaded from JSON.
#[cfg(feature = "cascade")]
pub mod dependencies;

pub use cadence::{CadenceProfile, Tier};
#[cfg(feature = "hub")]
pub use credentials::{CredentialsFile, StaticCredentials};
#[cfg(feature = "cascade")]
pub use dependencies::{DependencyMap, DependentDecl};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads and deserializes a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
