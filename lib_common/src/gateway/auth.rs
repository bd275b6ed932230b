//! # Credential Verification
//!
//! Three credential classes are accepted, checked in this order:
//!
//! 1. **Bootstrap token**: a single provisioned secret, compared in constant
//!    time. Grants `admin`.
//! 2. **Service token**: a long-lived opaque token. Only its SHA-256 digest is
//!    stored; the record must be neither revoked nor expired.
//! 3. **Session token**: an HS256 JWT. After signature and expiry checks the
//!    subject is looked up again, and the token is refused if the subject is
//!    gone, its role changed since issuance, or the role is not interactive.
//!
//! Verification runs on every subscribe and fetch-once. Nothing is cached per
//! connection, so a revoked credential blocks the next request but leaves
//! already joined rooms alone.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    User,
    /// Machine-to-machine capability class. Not allowed on telemetry channels
    /// through a session token.
    ApiOnly,
}

impl Role {
    pub fn is_interactive(&self) -> bool {
        !matches!(self, Role::ApiOnly)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::User => write!(f, "user"),
            Role::ApiOnly => write!(f, "api-only"),
        }
    }
}

/// Who is behind a connection, as established by [`Authenticator::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: String,
    pub role: Role,
    pub is_service_credential: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("credential expired")]
    Expired,
    #[error("subject no longer exists")]
    UnknownSubject,
    #[error("subject role changed since the credential was issued")]
    RoleChanged,
    #[error("role `{0}` is not allowed on this channel")]
    RoleDenied(Role),
    #[error("credential store unavailable: {0}")]
    Store(String),
}

/// A stored service token. `token_sha256` is the lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTokenRecord {
    pub id: String,
    pub token_sha256: String,
    pub role: Role,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ServiceTokenRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub id: String,
    pub role: Role,
}

#[async_trait]
pub trait ServiceTokenStore: Send + Sync {
    /// Active (non-revoked, non-expired) record with this digest, if any.
    async fn find_active(&self, token_sha256: &str) -> Result<Option<ServiceTokenRecord>, AuthError>;
}

#[async_trait]
pub trait SubjectStore: Send + Sync {
    async fn find_subject(&self, subject_id: &str) -> Result<Option<SubjectRecord>, AuthError>;
}

/// JWT claims of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn new(subject_id: impl Into<String>, role: Role, ttl: Duration) -> Self {
        let iat = Utc::now().timestamp();
        Self {
            sub: subject_id.into(),
            role,
            iat,
            exp: iat + ttl.as_secs() as i64,
        }
    }

    pub fn sign(&self, secret: &[u8]) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), self, &EncodingKey::from_secret(secret))
            .map_err(|e| AuthError::Store(format!("failed to sign session token: {e}")))
    }
}

/// Issues a session token for `subject_id`.
pub fn issue_session_token(
    secret: &[u8],
    subject_id: &str,
    role: Role,
    ttl: Duration,
) -> Result<String, AuthError> {
    SessionClaims::new(subject_id, role, ttl).sign(secret)
}

/// Lowercase hex SHA-256 of a raw token.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct Authenticator {
    bootstrap_token: Option<String>,
    session_secret: Vec<u8>,
    service_tokens: Arc<dyn ServiceTokenStore>,
    subjects: Arc<dyn SubjectStore>,
}

impl Authenticator {
    pub fn new(
        bootstrap_token: Option<String>,
        session_secret: impl Into<Vec<u8>>,
        service_tokens: Arc<dyn ServiceTokenStore>,
        subjects: Arc<dyn SubjectStore>,
    ) -> Self {
        Self {
            bootstrap_token: bootstrap_token.filter(|t| !t.is_empty()),
            session_secret: session_secret.into(),
            service_tokens,
            subjects,
        }
    }

    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        // Blank means absent; anything else is matched byte for byte.
        let credential = credential
            .filter(|c| !c.trim().is_empty())
            .ok_or(AuthError::MissingCredential)?;

        if self.is_bootstrap(credential) {
            return Ok(Identity {
                subject_id: "bootstrap".to_string(),
                role: Role::Admin,
                is_service_credential: true,
            });
        }

        if let Some(record) = self.service_tokens.find_active(&hash_token(credential)).await? {
            tracing::debug!(service_token = %record.id, "service credential accepted");
            return Ok(Identity {
                subject_id: record.id,
                role: record.role,
                is_service_credential: true,
            });
        }

        self.verify_session(credential).await
    }

    fn is_bootstrap(&self, credential: &str) -> bool {
        self.bootstrap_token
            .as_ref()
            .is_some_and(|b| bool::from(b.as_bytes().ct_eq(credential.as_bytes())))
    }

    async fn verify_session(&self, credential: &str) -> Result<Identity, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<SessionClaims>(
            credential,
            &DecodingKey::from_secret(&self.session_secret),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidCredential,
        })?
        .claims;

        let subject = self
            .subjects
            .find_subject(&claims.sub)
            .await?
            .ok_or(AuthError::UnknownSubject)?;

        if subject.role != claims.role {
            return Err(AuthError::RoleChanged);
        }
        if !subject.role.is_interactive() {
            return Err(AuthError::RoleDenied(subject.role));
        }

        Ok(Identity {
            subject_id: subject.id,
            role: subject.role,
            is_service_credential: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        tokens: Vec<ServiceTokenRecord>,
        subjects: Mutex<HashMap<String, Role>>,
    }

    #[async_trait]
    impl ServiceTokenStore for MemoryStore {
        async fn find_active(&self, token_sha256: &str) -> Result<Option<ServiceTokenRecord>, AuthError> {
            Ok(self
                .tokens
                .iter()
                .find(|r| r.token_sha256 == token_sha256 && r.is_active(Utc::now()))
                .cloned())
        }
    }

    #[async_trait]
    impl SubjectStore for MemoryStore {
        async fn find_subject(&self, subject_id: &str) -> Result<Option<SubjectRecord>, AuthError> {
            Ok(self.subjects.lock().unwrap().get(subject_id).map(|role| SubjectRecord {
                id: subject_id.to_string(),
                role: *role,
            }))
        }
    }

    const SECRET: &[u8] = b"test-secret";

    fn authenticator(store: Arc<MemoryStore>) -> Authenticator {
        Authenticator::new(Some("boot".into()), SECRET, store.clone(), store)
    }

    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore {
            tokens: vec![
                ServiceTokenRecord {
                    id: "ci".into(),
                    token_sha256: hash_token("svc-live"),
                    role: Role::ApiOnly,
                    revoked: false,
                    expires_at: None,
                },
                ServiceTokenRecord {
                    id: "old".into(),
                    token_sha256: hash_token("svc-revoked"),
                    role: Role::Admin,
                    revoked: true,
                    expires_at: None,
                },
            ],
            ..Default::default()
        };
        store.subjects.lock().unwrap().insert("alice".into(), Role::User);
        store.subjects.lock().unwrap().insert("robot".into(), Role::ApiOnly);
        Arc::new(store)
    }

    #[tokio::test]
    async fn bootstrap_token_wins() {
        let auth = authenticator(store());
        let id = auth.authenticate(Some("boot")).await.unwrap();
        assert_eq!(id.role, Role::Admin);
        assert!(id.is_service_credential);
    }

    #[tokio::test]
    async fn bootstrap_token_needs_an_exact_match() {
        let auth = authenticator(store());
        assert_eq!(auth.authenticate(Some(" boot\n")).await, Err(AuthError::InvalidCredential));
        assert_eq!(auth.authenticate(Some("boot ")).await, Err(AuthError::InvalidCredential));
        assert_eq!(auth.authenticate(Some("Boot")).await, Err(AuthError::InvalidCredential));
    }

    #[tokio::test]
    async fn missing_credential_is_rejected() {
        let auth = authenticator(store());
        assert_eq!(auth.authenticate(None).await, Err(AuthError::MissingCredential));
        assert_eq!(auth.authenticate(Some("  ")).await, Err(AuthError::MissingCredential));
    }

    #[tokio::test]
    async fn service_tokens_must_be_active() {
        let auth = authenticator(store());
        let id = auth.authenticate(Some("svc-live")).await.unwrap();
        assert_eq!(id.subject_id, "ci");
        assert!(id.is_service_credential);

        assert_eq!(
            auth.authenticate(Some("svc-revoked")).await,
            Err(AuthError::InvalidCredential)
        );
    }

    #[tokio::test]
    async fn session_token_round_trip() {
        let auth = authenticator(store());
        let token = issue_session_token(SECRET, "alice", Role::User, Duration::from_secs(60)).unwrap();
        let id = auth.authenticate(Some(token.as_str())).await.unwrap();
        assert_eq!(id.subject_id, "alice");
        assert_eq!(id.role, Role::User);
        assert!(!id.is_service_credential);
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let auth = authenticator(store());
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "alice".into(),
            role: Role::User,
            iat: now - 120,
            exp: now - 60,
        };
        let token = claims.sign(SECRET).unwrap();
        assert_eq!(auth.authenticate(Some(token.as_str())).await, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected() {
        let auth = authenticator(store());
        let token = issue_session_token(b"other", "alice", Role::User, Duration::from_secs(60)).unwrap();
        assert_eq!(auth.authenticate(Some(token.as_str())).await, Err(AuthError::InvalidCredential));
    }

    #[tokio::test]
    async fn role_change_and_deletion_invalidate_sessions() {
        let store = store();
        let auth = authenticator(store.clone());
        let token = issue_session_token(SECRET, "alice", Role::User, Duration::from_secs(60)).unwrap();

        store.subjects.lock().unwrap().insert("alice".into(), Role::Admin);
        assert_eq!(auth.authenticate(Some(token.as_str())).await, Err(AuthError::RoleChanged));

        store.subjects.lock().unwrap().remove("alice");
        assert_eq!(auth.authenticate(Some(token.as_str())).await, Err(AuthError::UnknownSubject));
    }

    #[tokio::test]
    async fn non_interactive_role_is_denied() {
        let auth = authenticator(store());
        let token = issue_session_token(SECRET, "robot", Role::ApiOnly, Duration::from_secs(60)).unwrap();
        assert_eq!(
            auth.authenticate(Some(token.as_str())).await,
            Err(AuthError::RoleDenied(Role::ApiOnly))
        );
    }

    #[test]
    fn token_hash_is_lowercase_hex() {
        let digest = hash_token("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
