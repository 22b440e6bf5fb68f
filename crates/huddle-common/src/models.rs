//! Identifiers and plain data shared by the gateway, voice, and storage layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type UserId = i64;
pub type GroupId = i64;
pub type ChannelId = i64;
pub type MessageId = i64;

/// Opaque identifier of one live socket. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A user as known to the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub status: String,
}

/// One entry of the `user-list-update` presence broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    #[serde(flatten)]
    pub profile: Profile,
    pub connection_id: ConnectionId,
}

/// Display info for a member of a voice room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

impl Participant {
    pub fn from_profile(connection_id: ConnectionId, profile: &Profile) -> Self {
        Self {
            connection_id,
            user_id: profile.id,
            username: profile.username.clone(),
            avatar: profile.avatar.clone(),
        }
    }
}

/// Reference to a file already stored by the upload service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Message body as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub file: Option<FileRef>,
}

/// A persisted message, in the shape clients render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author: String,
    pub avatar: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
}

/// Aggregated reactions for one emoji on one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub users: Vec<String>,
}
