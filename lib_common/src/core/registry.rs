//! # Channel Registry
//!
//! Tracks which connections sit in each topic room. A room exists exactly as
//! long as it has members, and each room owns the `CancellationToken` that its
//! polling loops watch. Emptying a room removes it and cancels the token under
//! the same lock, so no loop can see a live token for an empty room.
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::ConnectionId;

struct Room {
    members: HashSet<ConnectionId>,
    polling: CancellationToken,
}

/// Result of a join.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    /// The room was empty. The caller must start polling under this token.
    Activated(CancellationToken),
    /// Joined a room that was already polling.
    Joined,
    /// The connection was already a member. Nothing changed.
    AlreadyMember,
}

/// Result of a leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    NotMember,
    Left,
    /// The last member left; polling has been cancelled.
    Emptied,
}

#[derive(Default)]
pub struct ChannelRegistry {
    rooms: Mutex<HashMap<String, Room>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, conn: ConnectionId, topic: &str) -> JoinOutcome {
        let mut rooms = self.rooms.lock().expect("Registry lock poisoned");

        if let Some(room) = rooms.get_mut(topic) {
            return if room.members.insert(conn) {
                JoinOutcome::Joined
            } else {
                JoinOutcome::AlreadyMember
            };
        }

        let polling = CancellationToken::new();
        rooms.insert(
            topic.to_string(),
            Room {
                members: HashSet::from([conn]),
                polling: polling.clone(),
            },
        );
        tracing::debug!(topic, conn_id = conn, "room created");
        JoinOutcome::Activated(polling)
    }

    pub fn leave(&self, conn: ConnectionId, topic: &str) -> LeaveOutcome {
        let mut rooms = self.rooms.lock().expect("Registry lock poisoned");

        let Some(room) = rooms.get_mut(topic) else {
            return LeaveOutcome::NotMember;
        };
        if !room.members.remove(&conn) {
            return LeaveOutcome::NotMember;
        }
        if !room.members.is_empty() {
            return LeaveOutcome::Left;
        }

        if let Some(room) = rooms.remove(topic) {
            room.polling.cancel();
        }
        tracing::debug!(topic, conn_id = conn, "room emptied");
        LeaveOutcome::Emptied
    }

    pub fn member_count(&self, topic: &str) -> usize {
        let rooms = self.rooms.lock().expect("Registry lock poisoned");
        rooms.get(topic).map_or(0, |r| r.members.len())
    }

    /// Snapshot of the current members, for fan-out.
    pub fn members(&self, topic: &str) -> Vec<ConnectionId> {
        let rooms = self.rooms.lock().expect("Registry lock poisoned");
        rooms
            .get(topic)
            .map(|r| r.members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, conn: ConnectionId, topic: &str) -> bool {
        let rooms = self.rooms.lock().expect("Registry lock poisoned");
        rooms.get(topic).is_some_and(|r| r.members.contains(&conn))
    }

    /// Topics `conn` currently belongs to.
    pub fn topics_of(&self, conn: ConnectionId) -> Vec<String> {
        let rooms = self.rooms.lock().expect("Registry lock poisoned");
        rooms
            .iter()
            .filter(|(_, r)| r.members.contains(&conn))
            .map(|(t, _)| t.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_join_activates_and_last_leave_cancels() {
        let registry = ChannelRegistry::new();

        let token = match registry.join(1, "system-load") {
            JoinOutcome::Activated(token) => token,
            other => panic!("expected activation, got {other:?}"),
        };
        assert!(matches!(registry.join(2, "system-load"), JoinOutcome::Joined));
        assert_eq!(registry.member_count("system-load"), 2);

        assert_eq!(registry.leave(1, "system-load"), LeaveOutcome::Left);
        assert!(!token.is_cancelled());

        assert_eq!(registry.leave(2, "system-load"), LeaveOutcome::Emptied);
        assert!(token.is_cancelled());
        assert_eq!(registry.member_count("system-load"), 0);
        assert!(registry.topics_of(2).is_empty());
    }

    #[test]
    fn duplicate_join_and_absent_leave_are_noops() {
        let registry = ChannelRegistry::new();
        registry.join(1, "disk-io");
        assert!(matches!(registry.join(1, "disk-io"), JoinOutcome::AlreadyMember));
        assert_eq!(registry.member_count("disk-io"), 1);

        assert_eq!(registry.leave(7, "disk-io"), LeaveOutcome::NotMember);
        assert_eq!(registry.leave(1, "pool-status"), LeaveOutcome::NotMember);
        assert_eq!(registry.member_count("disk-io"), 1);
    }

    #[test]
    fn rejoin_after_empty_gets_fresh_token() {
        let registry = ChannelRegistry::new();
        let JoinOutcome::Activated(first) = registry.join(1, "disk-io") else {
            panic!("expected activation");
        };
        registry.leave(1, "disk-io");
        let JoinOutcome::Activated(second) = registry.join(1, "disk-io") else {
            panic!("expected activation");
        };
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn topics_of_lists_memberships() {
        let registry = ChannelRegistry::new();
        registry.join(1, "disk-io");
        registry.join(1, "system-load");
        registry.join(2, "pool-status");

        let mut topics = registry.topics_of(1);
        topics.sort();
        assert_eq!(topics, vec!["disk-io", "system-load"]);
        assert_eq!(registry.topics_of(2), vec!["pool-status"]);
    }
}
