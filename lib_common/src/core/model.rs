//! # Wire Model
//!
//! JSON frames exchanged over the socket. Client frames are tagged by `event`
//! and decoded with serde. Server frames are built by the hub and encoded
//! through [`ServerMessage::to_json`], since the update event name carries the
//! topic (`system-load-update`) and cannot be a fixed serde tag.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    Subscribe {
        topic: String,
        #[serde(default)]
        token: Option<String>,
    },
    Unsubscribe {
        topic: String,
    },
    FetchOnce {
        topic: String,
        #[serde(default)]
        token: Option<String>,
    },
    /// Keepalive. Needs no credential.
    Ping,
}

/// Frames the hub sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `<topic>-update` carrying `{ metricClass: value }` pairs.
    Update {
        topic: String,
        ts: i64,
        data: Map<String, Value>,
    },
    SubscriptionConfirmed {
        topic: String,
        cadences: BTreeMap<String, u64>,
    },
    UnsubscriptionConfirmed {
        topic: String,
    },
    Error {
        topic: Option<String>,
        message: String,
    },
    Pong,
}

impl ServerMessage {
    /// Builds an update stamped with the current wall clock.
    pub fn update(topic: impl Into<String>, data: Map<String, Value>) -> Self {
        ServerMessage::Update {
            topic: topic.into(),
            ts: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }

    pub fn error(topic: Option<&str>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            topic: topic.map(str::to_string),
            message: message.into(),
        }
    }

    /// The `event` field of the encoded frame.
    pub fn event_name(&self) -> String {
        match self {
            ServerMessage::Update { topic, .. } => format!("{topic}-update"),
            ServerMessage::SubscriptionConfirmed { .. } => "subscription-confirmed".to_string(),
            ServerMessage::UnsubscriptionConfirmed { .. } => "unsubscription-confirmed".to_string(),
            ServerMessage::Error { .. } => "error".to_string(),
            ServerMessage::Pong => "pong".to_string(),
        }
    }

    /// Topic the frame refers to, if any.
    pub fn topic(&self) -> Option<&str> {
        match self {
            ServerMessage::Update { topic, .. }
            | ServerMessage::SubscriptionConfirmed { topic, .. }
            | ServerMessage::UnsubscriptionConfirmed { topic } => Some(topic),
            ServerMessage::Error { topic, .. } => topic.as_deref(),
            ServerMessage::Pong => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let event = self.event_name();
        match self {
            ServerMessage::Update { topic, ts, data } => json!({
                "event": event,
                "topic": topic,
                "ts": ts,
                "data": data,
            }),
            ServerMessage::SubscriptionConfirmed { topic, cadences } => json!({
                "event": event,
                "topic": topic,
                "cadences": cadences,
            }),
            ServerMessage::UnsubscriptionConfirmed { topic } => json!({
                "event": event,
                "topic": topic,
            }),
            ServerMessage::Error { topic: Some(topic), message } => json!({
                "event": event,
                "topic": topic,
                "message": message,
            }),
            ServerMessage::Error { topic: None, message } => json!({
                "event": event,
                "message": message,
            }),
            ServerMessage::Pong => json!({ "event": event }),
        }
    }

    /// Text frame payload.
    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }
}
