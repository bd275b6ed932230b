//! # Dependency Declarations
//!
//! Static `primary → [dependent]` map. Order inside each list is the
//! declaration order and is the order dependents are dispatched in.
//!
//! ```json
//! { "web": [{ "id": "worker", "autoStart": true }, { "id": "cron", "autoStart": false }] }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::configs::{read_json, ConfigError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentDecl {
    pub id: String,
    #[serde(default)]
    pub auto_start: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyMap {
    entries: HashMap<String, Vec<DependentDecl>>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let map: Self = read_json(path)?;
        tracing::info!(path = %path.display(), primaries = map.entries.len(), "dependencies loaded");
        Ok(map)
    }

    pub fn with_dependents(mut self, primary: &str, dependents: Vec<DependentDecl>) -> Self {
        self.entries.insert(primary.to_string(), dependents);
        self
    }

    /// Dependents of `primary` in declaration order.
    pub fn dependents(&self, primary: &str, only_auto_start: bool) -> Vec<String> {
        self.entries
            .get(primary)
            .map(|list| {
                list.iter()
                    .filter(|d| !only_auto_start || d.auto_start)
                    .map(|d| d.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
