//! # Connection Gateway
//!
//! Turns decoded client frames into hub operations. The transport (a
//! WebSocket task in the server) owns the socket; this type owns the protocol.
//! Replies never go back through the return value; they are pushed into the
//! connection's dispatcher queue like every other frame, so ordering between
//! confirmations and updates is the order of that queue.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::cache::ReadMode;
use crate::core::dispatcher::{ConnectionId, Dispatcher};
use crate::core::lifecycle::LifecycleController;
use crate::core::model::{ClientMessage, ServerMessage};
use crate::gateway::auth::{Authenticator, Identity};

/// Per-connection state held by the transport task.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Identity from the most recent successful authentication.
    pub identity: Option<Identity>,
}

pub struct ConnectionGateway {
    auth: Arc<Authenticator>,
    lifecycle: Arc<LifecycleController>,
}

impl ConnectionGateway {
    pub fn new(auth: Arc<Authenticator>, lifecycle: Arc<LifecycleController>) -> Self {
        Self { auth, lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    fn dispatcher(&self) -> &Dispatcher {
        self.lifecycle.dispatcher()
    }

    /// Registers a new connection and returns its outbound queue.
    pub fn open(&self) -> (Connection, mpsc::UnboundedReceiver<Arc<ServerMessage>>) {
        let (id, rx) = self.dispatcher().register();
        (Connection { id, identity: None }, rx)
    }

    /// Decodes one text frame and handles it.
    pub async fn handle_text(&self, conn: &mut Connection, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(conn, message).await,
            Err(e) => {
                tracing::debug!(conn_id = conn.id, error = %e, "malformed frame");
                self.dispatcher()
                    .send_to(conn.id, ServerMessage::error(None, format!("malformed frame: {e}")));
            }
        }
    }

    pub async fn handle(&self, conn: &mut Connection, message: ClientMessage) {
        match message {
            ClientMessage::Subscribe { topic, token } => {
                self.subscribe(conn, &topic, token.as_deref()).await
            }
            ClientMessage::Unsubscribe { topic } => self.unsubscribe(conn, &topic),
            ClientMessage::FetchOnce { topic, token } => {
                self.fetch_once(conn, &topic, token.as_deref()).await
            }
            ClientMessage::Ping => {
                self.dispatcher().send_to(conn.id, ServerMessage::Pong);
            }
        }
    }

    async fn authorize(&self, conn: &mut Connection, topic: &str, token: Option<&str>) -> bool {
        match self.auth.authenticate(token).await {
            Ok(identity) => {
                tracing::debug!(conn_id = conn.id, subject = %identity.subject_id, role = %identity.role, "authenticated");
                conn.identity = Some(identity);
                true
            }
            Err(e) => {
                tracing::warn!(conn_id = conn.id, topic, error = %e, "authentication failed");
                self.dispatcher()
                    .send_to(conn.id, ServerMessage::error(Some(topic), e.to_string()));
                false
            }
        }
    }

    async fn subscribe(&self, conn: &mut Connection, topic: &str, token: Option<&str>) {
        if !self.authorize(conn, topic, token).await {
            return;
        }

        let joined = match self.lifecycle.join(conn.id, topic) {
            Ok(joined) => joined,
            Err(e) => {
                self.dispatcher()
                    .send_to(conn.id, ServerMessage::error(Some(topic), e.to_string()));
                return;
            }
        };

        self.dispatcher().send_to(
            conn.id,
            ServerMessage::SubscriptionConfirmed {
                topic: topic.to_string(),
                cadences: joined.topic.cadences(),
            },
        );
        tracing::info!(conn_id = conn.id, topic, members = self.lifecycle.member_count(topic), "subscribed");

        if joined.already_member {
            return;
        }
        let mode = if joined.activated {
            ReadMode::Forced
        } else {
            ReadMode::Cached
        };
        self.lifecycle.send_snapshot(conn.id, &joined.topic, mode).await;
    }

    fn unsubscribe(&self, conn: &mut Connection, topic: &str) {
        self.lifecycle.leave(conn.id, topic);
        self.dispatcher().send_to(
            conn.id,
            ServerMessage::UnsubscriptionConfirmed {
                topic: topic.to_string(),
            },
        );
        tracing::info!(conn_id = conn.id, topic, "unsubscribed");
    }

    async fn fetch_once(&self, conn: &mut Connection, topic: &str, token: Option<&str>) {
        if !self.authorize(conn, topic, token).await {
            return;
        }
        if let Err(e) = self.lifecycle.fetch_once(conn.id, topic).await {
            self.dispatcher()
                .send_to(conn.id, ServerMessage::error(Some(topic), e.to_string()));
        }
    }

    /// Leaves every room and drops the outbound queue.
    pub fn close(&self, conn: &Connection) {
        self.lifecycle.disconnect(conn.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topics::{MetricClassSpec, MetricProducer, ProducerError, TopicCatalog, TopicSpec};
    use crate::configs::StaticCredentials;
    use crate::gateway::auth::{
        issue_session_token, AuthError, Role, ServiceTokenRecord, ServiceTokenStore, SubjectRecord,
        SubjectStore,
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct NoStore;

    #[async_trait]
    impl ServiceTokenStore for NoStore {
        async fn find_active(&self, _: &str) -> Result<Option<ServiceTokenRecord>, AuthError> {
            Ok(None)
        }
    }

    #[async_trait]
    impl SubjectStore for NoStore {
        async fn find_subject(&self, _: &str) -> Result<Option<SubjectRecord>, AuthError> {
            Ok(None)
        }
    }

    struct Fixed;

    #[async_trait]
    impl MetricProducer for Fixed {
        async fn produce(&self) -> Result<Value, ProducerError> {
            Ok(json!({ "free": 10 }))
        }
    }

    fn gateway_with(service_tokens: Arc<dyn ServiceTokenStore>, subjects: Arc<dyn SubjectStore>) -> ConnectionGateway {
        let topic = TopicSpec::new(
            "disk-io",
            vec![MetricClassSpec::new("disks", Duration::from_secs(1), Duration::from_millis(500), Arc::new(Fixed))],
        );
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::new(TopicCatalog::new().with_topic(topic)),
            Arc::new(Dispatcher::new()),
        ));
        let auth = Arc::new(Authenticator::new(Some("boot".into()), b"secret".to_vec(), service_tokens, subjects));
        ConnectionGateway::new(auth, lifecycle)
    }

    fn gateway() -> ConnectionGateway {
        let store = Arc::new(NoStore);
        gateway_with(store.clone(), store)
    }

    fn events(rx: &mut mpsc::UnboundedReceiver<Arc<ServerMessage>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame.event_name());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_confirms_then_snapshots() {
        let gateway = gateway();
        let (mut conn, mut rx) = gateway.open();
        gateway
            .handle_text(&mut conn, r#"{"event":"subscribe","topic":"disk-io","token":"boot"}"#)
            .await;
        assert_eq!(events(&mut rx), vec!["subscription-confirmed", "disk-io-update"]);
        assert!(conn.identity.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_subscribe_only_confirms() {
        let gateway = gateway();
        let (mut conn, mut rx) = gateway.open();
        let frame = r#"{"event":"subscribe","topic":"disk-io","token":"boot"}"#;
        gateway.handle_text(&mut conn, frame).await;
        events(&mut rx);
        gateway.handle_text(&mut conn, frame).await;
        assert_eq!(events(&mut rx), vec!["subscription-confirmed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_credential_yields_only_error() {
        let gateway = gateway();
        let (mut conn, mut rx) = gateway.open();
        gateway
            .handle_text(&mut conn, r#"{"event":"subscribe","topic":"disk-io","token":"nope"}"#)
            .await;
        assert_eq!(events(&mut rx), vec!["error"]);
        assert_eq!(gateway.lifecycle().member_count("disk-io"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_topic_and_malformed_frames_yield_errors() {
        let gateway = gateway();
        let (mut conn, mut rx) = gateway.open();
        gateway
            .handle_text(&mut conn, r#"{"event":"subscribe","topic":"weather","token":"boot"}"#)
            .await;
        gateway.handle_text(&mut conn, "not json").await;

        let first = rx.try_recv().unwrap();
        assert_eq!(first.topic(), Some("weather"));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.event_name(), "error");
        assert_eq!(second.topic(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_and_close_release_rooms() {
        let gateway = gateway();
        let (mut conn, mut rx) = gateway.open();
        gateway
            .handle(&mut conn, ClientMessage::Subscribe { topic: "disk-io".into(), token: Some("boot".into()) })
            .await;
        gateway.handle(&mut conn, ClientMessage::Unsubscribe { topic: "disk-io".into() }).await;
        assert_eq!(
            events(&mut rx),
            vec!["subscription-confirmed", "disk-io-update", "unsubscription-confirmed"]
        );
        assert!(gateway.lifecycle().active_timers("disk-io").is_empty());

        gateway
            .handle(&mut conn, ClientMessage::Subscribe { topic: "disk-io".into(), token: Some("boot".into()) })
            .await;
        gateway.close(&conn);
        assert_eq!(gateway.lifecycle().member_count("disk-io"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_once_without_a_valid_credential_yields_only_error() {
        let gateway = gateway();
        let (mut conn, mut rx) = gateway.open();
        gateway
            .handle_text(&mut conn, r#"{"event":"fetch-once","topic":"disk-io","token":"nope"}"#)
            .await;
        gateway.handle_text(&mut conn, r#"{"event":"fetch-once","topic":"disk-io"}"#).await;

        assert_eq!(events(&mut rx), vec!["error", "error"]);
        assert!(conn.identity.is_none());
        assert!(gateway.lifecycle().active_timers("disk-io").is_empty());
        assert!(gateway.lifecycle().cache().peek("disk-io", "disks").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_once_answers_only_the_requester() {
        let gateway = gateway();
        let (mut member, mut member_rx) = gateway.open();
        let (mut outsider, mut outsider_rx) = gateway.open();
        gateway
            .handle_text(&mut member, r#"{"event":"subscribe","topic":"disk-io","token":"boot"}"#)
            .await;
        events(&mut member_rx);

        gateway
            .handle_text(&mut outsider, r#"{"event":"fetch-once","topic":"disk-io","token":"boot"}"#)
            .await;

        assert_eq!(events(&mut outsider_rx), vec!["disk-io-update"]);
        assert!(events(&mut member_rx).is_empty());
        assert_eq!(gateway.lifecycle().member_count("disk-io"), 1);
        assert_eq!(gateway.lifecycle().active_timers("disk-io").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_once_without_members_starts_no_timers() {
        let gateway = gateway();
        let (mut conn, mut rx) = gateway.open();
        gateway
            .handle_text(&mut conn, r#"{"event":"fetch-once","topic":"disk-io","token":"boot"}"#)
            .await;
        assert_eq!(events(&mut rx), vec!["disk-io-update"]);
        assert_eq!(gateway.lifecycle().member_count("disk-io"), 0);
        assert!(gateway.lifecycle().active_timers("disk-io").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_once_after_a_role_change_is_refused_but_the_stream_continues() {
        let credentials = Arc::new(StaticCredentials::default());
        credentials.set_role("alice", Role::User);
        let gateway = gateway_with(credentials.clone(), credentials.clone());
        let token = issue_session_token(b"secret", "alice", Role::User, Duration::from_secs(3600)).unwrap();

        let (mut conn, mut rx) = gateway.open();
        gateway
            .handle(&mut conn, ClientMessage::Subscribe { topic: "disk-io".into(), token: Some(token.clone()) })
            .await;
        assert_eq!(events(&mut rx), vec!["subscription-confirmed", "disk-io-update"]);

        credentials.set_role("alice", Role::ApiOnly);
        gateway
            .handle(&mut conn, ClientMessage::FetchOnce { topic: "disk-io".into(), token: Some(token) })
            .await;
        let refusal = rx.try_recv().unwrap();
        assert_eq!(
            refusal.as_ref(),
            &ServerMessage::error(Some("disk-io"), AuthError::RoleChanged.to_string())
        );
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert_eq!(events(&mut rx), vec!["disk-io-update"]);
        assert_eq!(gateway.lifecycle().member_count("disk-io"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_once_on_an_unknown_topic_names_it_in_the_error() {
        let gateway = gateway();
        let (mut conn, mut rx) = gateway.open();
        gateway
            .handle_text(&mut conn, r#"{"event":"fetch-once","topic":"weather","token":"boot"}"#)
            .await;

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event_name(), "error");
        assert_eq!(frame.topic(), Some("weather"));
        assert!(rx.try_recv().is_err());
        assert!(gateway.lifecycle().active_timers("weather").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ping_needs_no_credential() {
        let gateway = gateway();
        let (mut conn, mut rx) = gateway.open();
        gateway.handle_text(&mut conn, r#"{"event":"ping"}"#).await;
        assert_eq!(events(&mut rx), vec!["pong"]);
    }
}
