//! Voice rooms: which connections are in which call context.
//!
//! A room is named by a [`RoomKey`]: a server voice channel, a group's voice
//! room, or the private room of two users in a DM call. Membership is keyed by
//! connection, not user, so a stale socket can always be swept out by id.
//!
//! Two indexes for fast lookups:
//! - `rooms`: room → participants in join order ("who's in this room?")
//! - `by_connection`: connection → rooms ("where is this socket?")

use huddle_common::models::{ConnectionId, GroupId, Participant, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Canonical identifier of a call context.
///
/// Keys are pure functions of their inputs, so a client that reconnects and
/// rejoins resolves to the same room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RoomKey {
    ServerVoice { channel_name: String },
    GroupVoice { group_id: GroupId },
    DmPair { min_user_id: UserId, max_user_id: UserId },
}

impl RoomKey {
    pub fn server_voice(channel_name: impl Into<String>) -> Self {
        Self::ServerVoice {
            channel_name: channel_name.into(),
        }
    }

    pub fn group_voice(group_id: GroupId) -> Self {
        Self::GroupVoice { group_id }
    }

    /// Both participants compute the same key regardless of who called.
    pub fn dm_pair(a: UserId, b: UserId) -> Self {
        Self::DmPair {
            min_user_id: a.min(b),
            max_user_id: a.max(b),
        }
    }

    pub fn is_dm(&self) -> bool {
        matches!(self, Self::DmPair { .. })
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerVoice { channel_name } => write!(f, "voice:{channel_name}"),
            Self::GroupVoice { group_id } => write!(f, "group-voice:{group_id}"),
            Self::DmPair {
                min_user_id,
                max_user_id,
            } => write!(f, "dm:{min_user_id}:{max_user_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The room had no members before this join.
    pub was_empty: bool,
    /// The connection was already a member; nothing changed.
    pub already_member: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The participant entry removed, if the connection was a member.
    pub removed: Option<Participant>,
    pub is_empty_now: bool,
}

impl LeaveOutcome {
    pub fn had_member(&self) -> bool {
        self.removed.is_some()
    }
}

/// One room a connection was swept out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room: RoomKey,
    pub participant: Participant,
    pub is_empty_now: bool,
}

/// Room membership store. Not synchronized; the coordinator owns it behind
/// its lock.
#[derive(Debug, Default)]
pub struct RoomMembership {
    rooms: HashMap<RoomKey, Vec<Participant>>,
    by_connection: HashMap<ConnectionId, BTreeSet<RoomKey>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant. Re-joining is a no-op reporting `was_empty = false`.
    pub fn join(&mut self, room: &RoomKey, participant: Participant) -> JoinOutcome {
        let members = self.rooms.entry(room.clone()).or_default();

        if members
            .iter()
            .any(|p| p.connection_id == participant.connection_id)
        {
            return JoinOutcome {
                was_empty: false,
                already_member: true,
            };
        }

        let was_empty = members.is_empty();
        self.by_connection
            .entry(participant.connection_id)
            .or_default()
            .insert(room.clone());
        members.push(participant);

        JoinOutcome {
            was_empty,
            already_member: false,
        }
    }

    /// Remove a connection from one room. Leaving a room twice, or one never
    /// joined, reports `had_member() == false`.
    pub fn leave(&mut self, room: &RoomKey, connection: ConnectionId) -> LeaveOutcome {
        let Some(members) = self.rooms.get_mut(room) else {
            return LeaveOutcome {
                removed: None,
                is_empty_now: true,
            };
        };

        let removed = members
            .iter()
            .position(|p| p.connection_id == connection)
            .map(|idx| members.remove(idx));
        let is_empty_now = members.is_empty();

        if is_empty_now {
            self.rooms.remove(room);
        }
        if removed.is_some() {
            if let Some(rooms) = self.by_connection.get_mut(&connection) {
                rooms.remove(room);
                if rooms.is_empty() {
                    self.by_connection.remove(&connection);
                }
            }
        }

        LeaveOutcome {
            removed,
            is_empty_now,
        }
    }

    /// Remove a connection from every room it is in, in one pass.
    pub fn leave_all(&mut self, connection: ConnectionId) -> Vec<Departure> {
        let rooms = self.by_connection.remove(&connection).unwrap_or_default();

        rooms
            .into_iter()
            .filter_map(|room| {
                let members = self.rooms.get_mut(&room)?;
                let idx = members.iter().position(|p| p.connection_id == connection)?;
                let participant = members.remove(idx);
                let is_empty_now = members.is_empty();
                if is_empty_now {
                    self.rooms.remove(&room);
                }
                Some(Departure {
                    room,
                    participant,
                    is_empty_now,
                })
            })
            .collect()
    }

    /// Participants of a room in join order.
    pub fn members_of(&self, room: &RoomKey) -> &[Participant] {
        self.rooms.get(room).map(Vec::as_slice).unwrap_or_default()
    }

    /// Participants of a room other than `connection`.
    pub fn others_in(&self, room: &RoomKey, connection: ConnectionId) -> Vec<Participant> {
        self.members_of(room)
            .iter()
            .filter(|p| p.connection_id != connection)
            .cloned()
            .collect()
    }

    pub fn rooms_of(&self, connection: ConnectionId) -> Vec<RoomKey> {
        self.by_connection
            .get(&connection)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &RoomKey, connection: ConnectionId) -> bool {
        self.by_connection
            .get(&connection)
            .is_some_and(|rooms| rooms.contains(room))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn participant_count(&self) -> usize {
        self.rooms.values().map(Vec::len).sum()
    }
}
