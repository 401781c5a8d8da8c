//! Room Directory
//!
//! Maps room ids to member connections. Room table and membership index live
//! behind one lock so joins and leaves are linearizable: a connection is never
//! in two rooms, and two concurrent joins to an empty room cannot both be first.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parla_common::{ConnectionId, RoomId};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::SessionError;

/// A rendezvous point with its members in join order.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    members: Vec<ConnectionId>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    fn new(id: RoomId) -> Self {
        Self {
            id,
            members: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn members(&self) -> &[ConnectionId] {
        &self.members
    }
}

/// Public room summary.
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room_id: RoomId,
    /// Membership size after the join, joiner included.
    pub member_count: usize,
    /// Other members at the time of the join.
    pub peers: Vec<ConnectionId>,
    /// Room implicitly left to make this join.
    pub previous: Option<LeaveOutcome>,
    /// The connection was already a member; nothing changed.
    pub already_member: bool,
}

/// Result of removing a connection from its room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room_id: RoomId,
    /// Members still present.
    pub remaining: Vec<ConnectionId>,
    /// The room became empty and its record was deleted.
    pub room_deleted: bool,
}

#[derive(Default)]
struct DirectoryState {
    rooms: HashMap<RoomId, Room>,
    membership: HashMap<ConnectionId, RoomId>,
}

impl DirectoryState {
    fn remove_member(&mut self, connection_id: ConnectionId) -> Option<LeaveOutcome> {
        let room_id = self.membership.remove(&connection_id)?;
        let room = self.rooms.get_mut(&room_id)?;
        room.members.retain(|id| *id != connection_id);
        let remaining = room.members.clone();

        let room_deleted = remaining.is_empty();
        if room_deleted {
            self.rooms.remove(&room_id);
            info!(room_id = %room_id, "Room deleted");
        }

        Some(LeaveOutcome {
            room_id,
            remaining,
            room_deleted,
        })
    }
}

/// Room table shared by all connections.
pub struct RoomDirectory {
    state: RwLock<DirectoryState>,
    max_members: usize,
}

impl RoomDirectory {
    #[must_use]
    pub fn new(max_members: usize) -> Self {
        Self {
            state: RwLock::new(DirectoryState::default()),
            max_members: max_members.max(1),
        }
    }

    #[must_use]
    pub const fn max_members(&self) -> usize {
        self.max_members
    }

    /// Join `room_id`, first leaving any other room.
    ///
    /// A full room rejects the joiner and leaves its current membership alone.
    pub async fn join(
        &self,
        room_id: RoomId,
        connection_id: ConnectionId,
    ) -> Result<JoinOutcome, SessionError> {
        let mut state = self.state.write().await;

        if state.membership.get(&connection_id) == Some(&room_id) {
            let members = state
                .rooms
                .get(&room_id)
                .map(|room| room.members.clone())
                .unwrap_or_default();
            return Ok(JoinOutcome {
                room_id,
                member_count: members.len(),
                peers: members.into_iter().filter(|id| *id != connection_id).collect(),
                previous: None,
                already_member: true,
            });
        }

        let current = state.rooms.get(&room_id).map_or(0, |room| room.members.len());
        if current >= self.max_members {
            return Err(SessionError::RoomFull {
                max_members: self.max_members,
            });
        }

        let previous = state.remove_member(connection_id);

        let room = state.rooms.entry(room_id.clone()).or_insert_with(|| {
            info!(room_id = %room_id, "Room created");
            Room::new(room_id.clone())
        });
        let peers = room.members.clone();
        room.members.push(connection_id);
        let member_count = room.members.len();
        state.membership.insert(connection_id, room_id.clone());

        debug!(
            room_id = %room_id,
            connection_id = %connection_id,
            member_count,
            "Connection joined room"
        );

        Ok(JoinOutcome {
            room_id,
            member_count,
            peers,
            previous,
            already_member: false,
        })
    }

    /// Remove the connection from whatever room it is in. No-op if none.
    pub async fn leave(&self, connection_id: ConnectionId) -> Option<LeaveOutcome> {
        let outcome = self.state.write().await.remove_member(connection_id);
        if let Some(outcome) = &outcome {
            debug!(
                room_id = %outcome.room_id,
                connection_id = %connection_id,
                remaining = outcome.remaining.len(),
                "Connection left room"
            );
        }
        outcome
    }

    /// Other members of the connection's room; empty if alone or roomless.
    pub async fn peers_of(&self, connection_id: ConnectionId) -> Vec<ConnectionId> {
        let state = self.state.read().await;
        state
            .membership
            .get(&connection_id)
            .and_then(|room_id| state.rooms.get(room_id))
            .map(|room| {
                room.members
                    .iter()
                    .copied()
                    .filter(|id| *id != connection_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn room_of(&self, connection_id: ConnectionId) -> Option<RoomId> {
        self.state.read().await.membership.get(&connection_id).cloned()
    }

    pub async fn member_count(&self, room_id: &RoomId) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(room_id)
            .map_or(0, |room| room.members.len())
    }

    pub async fn contains_room(&self, room_id: &RoomId) -> bool {
        self.state.read().await.rooms.contains_key(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    pub async fn info(&self, room_id: &RoomId) -> Option<RoomInfo> {
        self.state.read().await.rooms.get(room_id).map(|room| RoomInfo {
            room_id: room.id.clone(),
            member_count: room.members.len(),
            created_at: room.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn room(name: &str) -> RoomId {
        RoomId::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_join_reports_member_count() {
        let directory = RoomDirectory::new(2);
        let (a, b) = (ConnectionId::new(), ConnectionId::new());

        let first = directory.join(room("abc123"), a).await.unwrap();
        assert_eq!(first.member_count, 1);
        assert!(first.peers.is_empty());

        let second = directory.join(room("abc123"), b).await.unwrap();
        assert_eq!(second.member_count, 2);
        assert_eq!(second.peers, vec![a]);
        assert_eq!(directory.peers_of(a).await, vec![b]);
        assert_eq!(directory.peers_of(b).await, vec![a]);
    }

    #[tokio::test]
    async fn test_join_moves_connection_between_rooms() {
        let directory = RoomDirectory::new(2);
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        directory.join(room("one"), a).await.unwrap();
        directory.join(room("one"), b).await.unwrap();

        let moved = directory.join(room("two"), a).await.unwrap();
        let previous = moved.previous.unwrap();
        assert_eq!(previous.room_id, room("one"));
        assert_eq!(previous.remaining, vec![b]);
        assert!(!previous.room_deleted);

        assert_eq!(directory.room_of(a).await, Some(room("two")));
        assert_eq!(directory.member_count(&room("one")).await, 1);
        assert!(directory.peers_of(b).await.is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_same_room_is_idempotent() {
        let directory = RoomDirectory::new(2);
        let a = ConnectionId::new();
        directory.join(room("abc123"), a).await.unwrap();
        let again = directory.join(room("abc123"), a).await.unwrap();

        assert!(again.already_member);
        assert_eq!(again.member_count, 1);
    }

    #[tokio::test]
    async fn test_full_room_rejects_without_leaving_previous() {
        let directory = RoomDirectory::new(2);
        let (a, b, c) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        directory.join(room("full"), a).await.unwrap();
        directory.join(room("full"), b).await.unwrap();
        directory.join(room("other"), c).await.unwrap();

        let err = directory.join(room("full"), c).await.unwrap_err();
        assert!(matches!(err, SessionError::RoomFull { max_members: 2 }));
        assert_eq!(directory.room_of(c).await, Some(room("other")));
        assert_eq!(directory.member_count(&room("full")).await, 2);
    }

    #[tokio::test]
    async fn test_last_leave_deletes_room() {
        let directory = RoomDirectory::new(2);
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        directory.join(room("abc123"), a).await.unwrap();
        directory.join(room("abc123"), b).await.unwrap();

        let first = directory.leave(a).await.unwrap();
        assert!(!first.room_deleted);
        assert!(directory.peers_of(b).await.is_empty());
        assert!(directory.contains_room(&room("abc123")).await);

        let last = directory.leave(b).await.unwrap();
        assert!(last.room_deleted);
        assert!(!directory.contains_room(&room("abc123")).await);
        assert_eq!(directory.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_without_room_is_noop() {
        let directory = RoomDirectory::new(2);
        assert!(directory.leave(ConnectionId::new()).await.is_none());
        assert!(directory.peers_of(ConnectionId::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_member_count_never_drifts() {
        let directory = RoomDirectory::new(4);
        let ids: Vec<_> = (0..4).map(|_| ConnectionId::new()).collect();
        let mut expected: HashSet<ConnectionId> = HashSet::new();
        let script = [
            (0, true),
            (1, true),
            (0, false),
            (2, true),
            (2, true),
            (3, true),
            (1, false),
            (3, false),
            (5, false),
        ];

        for (idx, join) in script {
            let id = ids.get(idx).copied().unwrap_or_else(ConnectionId::new);
            if join {
                let outcome = directory.join(room("drift"), id).await.unwrap();
                expected.insert(id);
                assert_eq!(outcome.member_count, expected.len());
            } else {
                directory.leave(id).await;
                expected.remove(&id);
            }
            assert_eq!(directory.member_count(&room("drift")).await, expected.len());
        }
    }

    #[tokio::test]
    async fn test_concurrent_joins_to_empty_room_have_single_first() {
        let directory = Arc::new(RoomDirectory::new(2));
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let directory = directory.clone();
                tokio::spawn(async move { directory.join(room("race"), ConnectionId::new()).await })
            })
            .collect();

        let mut counts = Vec::new();
        for task in tasks {
            counts.push(task.await.unwrap().unwrap().member_count);
        }
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_concurrent_room_hopping_keeps_single_membership() {
        let directory = Arc::new(RoomDirectory::new(8));
        let id = ConnectionId::new();
        let tasks: Vec<_> = ["r1", "r2", "r3", "r4"]
            .into_iter()
            .map(|name| {
                let directory = directory.clone();
                tokio::spawn(async move { directory.join(room(name), id).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut rooms_containing = 0;
        for name in ["r1", "r2", "r3", "r4"] {
            rooms_containing += directory.member_count(&room(name)).await;
        }
        assert_eq!(rooms_containing, 1);
        assert_eq!(directory.room_count().await, 1);
    }
}
