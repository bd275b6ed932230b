//! # Message Dispatcher
//!
//! Every connection owns an unbounded queue of `Arc<ServerMessage>`. A
//! broadcast wraps the frame in an `Arc` once and hands each member a pointer
//! to the same allocation, so fan-out cost does not grow with payload size.
//! The socket task on the other end drains the queue and writes text frames.
//!
//! Queues whose receiver is gone are dropped during the next send, which is
//! how a vanished client is noticed without a separate heartbeat.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::core::model::ServerMessage;

/// Opaque connection identity assigned by [`Dispatcher::register`].
pub type ConnectionId = usize;

struct ClientHandle {
    sender: mpsc::UnboundedSender<Arc<ServerMessage>>,
}

/// # Core Dispatcher
///
/// Manages the registration, removal and fan-out of frames to connections.
pub struct Dispatcher {
    clients: Mutex<HashMap<ConnectionId, ClientHandle>>,
    next_id: AtomicUsize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Register
    ///
    /// Creates a queue for a new connection and returns its id together with
    /// the receiving half, which the connection's socket task drains.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Arc<ServerMessage>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        clients.insert(id, ClientHandle { sender: tx });
        tracing::debug!(conn_id = id, "connection registered");
        (id, rx)
    }

    /// Sends one frame to one connection. Returns `false` if the connection
    /// is unknown or its receiver has been dropped.
    pub fn send_to(&self, conn: ConnectionId, message: ServerMessage) -> bool {
        self.send_shared(conn, Arc::new(message))
    }

    pub fn send_shared(&self, conn: ConnectionId, message: Arc<ServerMessage>) -> bool {
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        let Some(client) = clients.get(&conn) else {
            return false;
        };
        if client.sender.send(message).is_ok() {
            return true;
        }
        clients.remove(&conn);
        tracing::info!(conn_id = conn, "receiver dropped; connection removed");
        false
    }

    /// # Broadcast
    ///
    /// Pushes the same frame into every listed connection's queue. Connections
    /// whose receiver is gone are removed. Returns how many queues accepted it.
    pub fn broadcast(&self, targets: &[ConnectionId], message: Arc<ServerMessage>) -> usize {
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        let mut delivered = 0;
        let mut dead = Vec::new();

        for conn in targets {
            let Some(client) = clients.get(conn) else {
                continue;
            };
            match client.sender.send(Arc::clone(&message)) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(*conn),
            }
        }

        for conn in dead {
            clients.remove(&conn);
            tracing::info!(conn_id = conn, "receiver dropped; connection removed");
        }
        delivered
    }

    pub fn remove_client(&self, conn: ConnectionId) -> bool {
        let mut clients = self.clients.lock().expect("Dispatcher lock poisoned");
        clients.remove(&conn).is_some()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("Dispatcher lock poisoned").len()
    }
}
