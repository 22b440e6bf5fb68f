//! Signaling router.
//!
//! Forwards WebRTC negotiation and call-control payloads between connections.
//! The router reads only the addressing; everything else in the payload is
//! passed through as-is with the sender's connection id attached as `from`.

use huddle_common::models::{ConnectionId, UserId};
use huddle_voice::{CallCoordinator, InviteTarget, RoomKey};

use crate::events::{Payload, Relayed, ServerEvent};
use crate::registry::ConnectionRegistry;

/// Keys the router owns. Client-supplied values for these are discarded.
const ADDRESSING_KEYS: [&str; 3] = ["from", "to", "room"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    VideoToggle,
    Speaking,
    CallInvite,
    CallAccept,
    CallReject,
    CallEnd,
}

impl SignalKind {
    /// Kinds a human is waiting on. When the target is offline the sender
    /// hears about it; media negotiation kinds are dropped silently.
    pub fn is_user_facing(self) -> bool {
        matches!(
            self,
            Self::CallInvite | Self::CallAccept | Self::CallReject | Self::CallEnd
        )
    }

    fn into_event(self, relayed: Relayed) -> ServerEvent {
        match self {
            Self::Offer => ServerEvent::Offer(relayed),
            Self::Answer => ServerEvent::Answer(relayed),
            Self::IceCandidate => ServerEvent::IceCandidate(relayed),
            Self::VideoToggle => ServerEvent::VideoToggle(relayed),
            Self::Speaking => ServerEvent::UserSpeaking(relayed),
            Self::CallInvite => ServerEvent::IncomingCall(relayed),
            Self::CallAccept => ServerEvent::CallAccepted(relayed),
            Self::CallReject => ServerEvent::CallRejected(relayed),
            Self::CallEnd => ServerEvent::PeerEndedCall(relayed),
        }
    }
}

#[derive(Clone)]
pub struct SignalingRouter {
    registry: ConnectionRegistry,
    calls: CallCoordinator,
}

impl SignalingRouter {
    pub fn new(registry: ConnectionRegistry, calls: CallCoordinator) -> Self {
        Self { registry, calls }
    }

    fn relayed(from: ConnectionId, mut payload: Payload) -> Relayed {
        for key in ADDRESSING_KEYS {
            payload.remove(key);
        }
        Relayed { from, payload }
    }

    /// Deliver to exactly one connection. Returns whether it was queued.
    pub async fn relay_directed(
        &self,
        kind: SignalKind,
        from: ConnectionId,
        to: ConnectionId,
        payload: Payload,
    ) -> bool {
        let event = kind.into_event(Self::relayed(from, payload));
        let delivered = self.registry.send_to(to, event).await;
        if !delivered {
            tracing::debug!(?kind, from = %from, to = %to, "Dropping signal for unknown connection");
        }
        delivered
    }

    /// Deliver to a user's current connection. For user-facing kinds the
    /// sender is told when the user cannot be reached.
    pub async fn relay_to_user(
        &self,
        kind: SignalKind,
        from: ConnectionId,
        to_user: UserId,
        payload: Payload,
    ) -> Option<ConnectionId> {
        let target = match self.registry.resolve_by_user(to_user).await {
            Ok(conn) => conn,
            Err(_) => {
                if kind.is_user_facing() {
                    self.registry
                        .send_to(
                            from,
                            ServerEvent::CallUnreachable {
                                target: InviteTarget::User { user_id: to_user },
                                message: "User is offline".into(),
                            },
                        )
                        .await;
                } else {
                    tracing::debug!(?kind, user = to_user, "Dropping signal for offline user");
                }
                return None;
            }
        };
        self.relay_directed(kind, from, target, payload)
            .await
            .then_some(target)
    }

    /// Deliver to every member of `room` except the sender. A sender that is
    /// not in the room reaches nobody.
    pub async fn relay_to_room(
        &self,
        kind: SignalKind,
        from: ConnectionId,
        room: &RoomKey,
        payload: Payload,
    ) -> usize {
        let members = self.calls.members_of(room).await;
        if !members.iter().any(|p| p.connection_id == from) {
            tracing::debug!(?kind, room = %room, from = %from, "Sender is not in room");
            return 0;
        }

        let relayed = Self::relayed(from, payload);
        let mut delivered = 0;
        for member in members.iter().filter(|p| p.connection_id != from) {
            if self
                .registry
                .send_to(member.connection_id, kind.into_event(relayed.clone()))
                .await
            {
                delivered += 1;
            }
        }
        delivered
    }
}
