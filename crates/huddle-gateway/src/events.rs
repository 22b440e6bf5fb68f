//! Gateway wire events.
//!
//! Frames are JSON text `{"event": "<kebab-name>", "data": {...}}` in both
//! directions. Signaling payloads are opaque: whatever the client sends besides
//! the addressing keys is forwarded untouched under a server-set `from`.

use huddle_common::models::{
    ChannelId, ChatMessage, ConnectionId, GroupId, MessageDraft, MessageId, Participant,
    PresenceEntry, ReactionSummary, UserId,
};
use huddle_common::HuddleError;
use huddle_voice::{CallEnded, CallStarted, CallType, InviteTarget, RoomKey};
use serde::{Deserialize, Serialize};

/// Opaque signaling body.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A room as named by a client. DM rooms are named by the peer; the server
/// derives the canonical pair key from the caller's own identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RoomDescriptor {
    ServerVoice { channel_name: String },
    GroupVoice { group_id: GroupId },
    Dm { peer_id: UserId },
}

impl RoomDescriptor {
    pub fn resolve(&self, me: UserId) -> RoomKey {
        match self {
            Self::ServerVoice { channel_name } => RoomKey::server_voice(channel_name.clone()),
            Self::GroupVoice { group_id } => RoomKey::group_voice(*group_id),
            Self::Dm { peer_id } => RoomKey::dm_pair(me, *peer_id),
        }
    }
}

/// Point-to-point signaling (offer/answer/ICE).
#[derive(Debug, Clone, Deserialize)]
pub struct Directed {
    pub to: ConnectionId,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Signaling that goes to one peer, one room, or every room the sender is in.
#[derive(Debug, Clone, Deserialize)]
pub struct Addressed {
    #[serde(default)]
    pub to: Option<ConnectionId>,
    #[serde(default)]
    pub room: Option<RoomDescriptor>,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Client → Server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinVoice {
        room: RoomDescriptor,
    },
    LeaveVoice {
        room: RoomDescriptor,
    },
    CallInvite {
        target: InviteTarget,
        call_type: CallType,
    },
    CallAccept {
        caller_id: UserId,
        #[serde(default)]
        group_id: Option<GroupId>,
    },
    CallReject {
        caller_id: UserId,
        #[serde(default)]
        group_id: Option<GroupId>,
        #[serde(default)]
        reason: Option<String>,
    },
    CallEnd {
        #[serde(default)]
        to: Option<ConnectionId>,
        #[serde(default)]
        room: Option<RoomDescriptor>,
    },
    Offer(Directed),
    Answer(Directed),
    IceCandidate(Directed),
    VideoToggle(Addressed),
    Speaking(Addressed),
    SendMessage {
        channel_id: ChannelId,
        message: MessageDraft,
    },
    SendDm {
        receiver_id: UserId,
        message: MessageDraft,
    },
    SendGroupMessage {
        group_id: GroupId,
        message: MessageDraft,
    },
    AddReaction {
        message_id: MessageId,
        emoji: String,
    },
    RemoveReaction {
        message_id: MessageId,
        emoji: String,
    },
    Ping,
}

impl ClientEvent {
    /// Chat writes report failures as `message-failed` rather than `error`.
    pub fn is_chat_write(&self) -> bool {
        matches!(
            self,
            Self::SendMessage { .. } | Self::SendDm { .. } | Self::SendGroupMessage { .. }
        )
    }
}

/// A relayed signaling payload tagged with the sender's connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relayed {
    pub from: ConnectionId,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Server → Client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    // Presence
    UserListUpdate {
        users: Vec<PresenceEntry>,
    },
    SessionReplaced,

    // Rooms
    ExistingVoiceUsers {
        room: RoomKey,
        users: Vec<Participant>,
    },
    UserJoinedVoice {
        room: RoomKey,
        user: Participant,
    },
    UserLeftVoice {
        room: RoomKey,
        connection_id: ConnectionId,
    },

    // Session lifecycle
    CallStarted(CallStarted),
    CallEnded {
        #[serde(flatten)]
        ended: CallEnded,
        duration_text: String,
    },

    // Invitations
    CallCancelled {
        caller_id: UserId,
        target: InviteTarget,
    },
    CallTimeout {
        target: InviteTarget,
    },
    CallUnreachable {
        target: InviteTarget,
        message: String,
    },

    // Relayed signaling
    IncomingCall(Relayed),
    CallAccepted(Relayed),
    CallRejected(Relayed),
    PeerEndedCall(Relayed),
    Offer(Relayed),
    Answer(Relayed),
    IceCandidate(Relayed),
    VideoToggle(Relayed),
    UserSpeaking(Relayed),

    // Chat
    NewMessage {
        channel_id: ChannelId,
        message: ChatMessage,
    },
    NewGroupMessage {
        group_id: GroupId,
        message: ChatMessage,
    },
    NewDm {
        sender_id: UserId,
        message: ChatMessage,
    },
    DmSent {
        receiver_id: UserId,
        message: ChatMessage,
    },
    ReactionUpdate {
        message_id: MessageId,
        reactions: Vec<ReactionSummary>,
    },
    MessageFailed {
        code: u16,
        message: String,
    },

    Pong {
        timestamp: i64,
    },
    Error {
        code: u16,
        error: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn call_ended(ended: CallEnded) -> Self {
        let duration_text = ended.duration.to_string();
        Self::CallEnded {
            ended,
            duration_text,
        }
    }

    pub fn error(err: &HuddleError) -> Self {
        Self::Error {
            code: err.close_code(),
            error: err.error_code().to_string(),
            message: err.client_message(),
        }
    }

    pub fn message_failed(err: &HuddleError) -> Self {
        Self::MessageFailed {
            code: err.close_code(),
            message: err.client_message(),
        }
    }
}
