//! # Static Credentials
//!
//! Service tokens and subject records read from a JSON file and held in
//! memory. Mutations (revocation, role changes) affect every later
//! authentication immediately.
//!
//! ```json
//! {
//!   "serviceTokens": [{ "id": "ci", "tokenSha256": "…", "role": "api-only", "revoked": false }],
//!   "subjects": [{ "id": "alice", "role": "user" }]
//! }
//! ```

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::configs::{read_json, ConfigError};
use crate::gateway::auth::{
    AuthError, Role, ServiceTokenRecord, ServiceTokenStore, SubjectRecord, SubjectStore,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsFile {
    #[serde(default)]
    pub service_tokens: Vec<ServiceTokenRecord>,
    #[serde(default)]
    pub subjects: Vec<SubjectRecord>,
}

#[derive(Debug, Default)]
pub struct StaticCredentials {
    inner: RwLock<CredentialsFile>,
}

impl StaticCredentials {
    pub fn new(file: CredentialsFile) -> Self {
        Self {
            inner: RwLock::new(file),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: CredentialsFile = read_json(path)?;
        tracing::info!(
            path = %path.display(),
            service_tokens = file.service_tokens.len(),
            subjects = file.subjects.len(),
            "credentials loaded"
        );
        Ok(Self::new(file))
    }

    /// Marks a service token revoked. Returns `false` if the id is unknown.
    pub fn revoke(&self, token_id: &str) -> bool {
        let mut inner = self.inner.write().expect("Credentials lock poisoned");
        match inner.service_tokens.iter_mut().find(|r| r.id == token_id) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    /// Inserts or updates a subject.
    pub fn set_role(&self, subject_id: &str, role: Role) {
        let mut inner = self.inner.write().expect("Credentials lock poisoned");
        match inner.subjects.iter_mut().find(|s| s.id == subject_id) {
            Some(subject) => subject.role = role,
            None => inner.subjects.push(SubjectRecord {
                id: subject_id.to_string(),
                role,
            }),
        }
    }

    pub fn remove_subject(&self, subject_id: &str) -> bool {
        let mut inner = self.inner.write().expect("Credentials lock poisoned");
        let before = inner.subjects.len();
        inner.subjects.retain(|s| s.id != subject_id);
        inner.subjects.len() != before
    }
}

#[async_trait]
impl ServiceTokenStore for StaticCredentials {
    async fn find_active(&self, token_sha256: &str) -> Result<Option<ServiceTokenRecord>, AuthError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| AuthError::Store(format!("lock poisoned: {e}")))?;
        let now = Utc::now();
        Ok(inner
            .service_tokens
            .iter()
            .find(|r| bool::from(r.token_sha256.as_bytes().ct_eq(token_sha256.as_bytes())))
            .filter(|r| r.is_active(now))
            .cloned())
    }
}

#[async_trait]
impl SubjectStore for StaticCredentials {
    async fn find_subject(&self, subject_id: &str) -> Result<Option<SubjectRecord>, AuthError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| AuthError::Store(format!("lock poisoned: {e}")))?;
        Ok(inner.subjects.iter().find(|s| s.id == subject_id).cloned())
    }
}
