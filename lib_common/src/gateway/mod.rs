//! # Gateway
//!
//! The client-facing edge of the hub: who is connecting ([`auth`]) and what
//! their frames do ([`handler`]).

pub mod auth;
pub mod handler;

pub use auth::{
    hash_token, issue_session_token, AuthError, Authenticator, Identity, Role, ServiceTokenRecord,
    ServiceTokenStore, SessionClaims, SubjectRecord, SubjectStore,
};
pub use handler::{Connection, ConnectionGateway};
