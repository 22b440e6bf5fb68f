//! Pending call invitations: the "ringing" state before anyone joins a room.
//!
//! An invitation is keyed by (caller, target). A DM invitation rings one user;
//! a group invitation rings every member except the caller and stays pending
//! until each callee answered, the caller hung up, or it expired. Answers to an
//! invitation that no longer exists, or from a user who already answered, are
//! stale and resolve to `None`.

use chrono::{DateTime, Duration, Utc};
use huddle_common::models::{ConnectionId, GroupId, Participant, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::room::RoomKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InviteTarget {
    User { user_id: UserId },
    Group { group_id: GroupId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub caller: Participant,
    pub target: InviteTarget,
    pub call_type: CallType,
    /// When ringing began. Display-only; session start times come from joins.
    pub created_at: DateTime<Utc>,
    pending: BTreeSet<UserId>,
}

impl Invitation {
    /// Callees who have not answered yet.
    pub fn pending(&self) -> impl Iterator<Item = UserId> + '_ {
        self.pending.iter().copied()
    }

    /// The room an accepted invitation puts caller and callee in.
    pub fn room(&self) -> RoomKey {
        match self.target {
            InviteTarget::User { user_id } => RoomKey::dm_pair(self.caller.user_id, user_id),
            InviteTarget::Group { group_id } => RoomKey::group_voice(group_id),
        }
    }
}

#[derive(Debug, Default)]
pub struct InvitationBook {
    invitations: HashMap<(UserId, InviteTarget), Invitation>,
}

impl InvitationBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ringing `callees`. A repeated invite from the same caller to the
    /// same target replaces the previous one.
    pub fn create(
        &mut self,
        caller: Participant,
        target: InviteTarget,
        call_type: CallType,
        callees: impl IntoIterator<Item = UserId>,
        now: DateTime<Utc>,
    ) -> Invitation {
        let pending: BTreeSet<UserId> = callees
            .into_iter()
            .filter(|uid| *uid != caller.user_id)
            .collect();

        let invitation = Invitation {
            caller,
            target,
            call_type,
            created_at: now,
            pending,
        };
        self.invitations.insert(
            (invitation.caller.user_id, target),
            invitation.clone(),
        );
        invitation
    }

    /// Record `responder`'s answer. Returns the invitation as it was before
    /// the answer, or `None` when the answer is stale.
    pub fn respond(
        &mut self,
        caller: UserId,
        target: InviteTarget,
        responder: UserId,
    ) -> Option<Invitation> {
        let key = (caller, target);
        let invitation = self.invitations.get_mut(&key)?;
        let snapshot = invitation.clone();
        if !invitation.pending.remove(&responder) {
            return None;
        }
        if invitation.pending.is_empty() {
            self.invitations.remove(&key);
        }
        Some(snapshot)
    }

    /// Drop every invitation placed from `connection`.
    pub fn cancel_from(&mut self, connection: ConnectionId) -> Vec<Invitation> {
        self.drain_where(|inv| inv.caller.connection_id == connection)
    }

    /// Drop invitations placed from `connection` that would lead into `room`.
    pub fn cancel_for_room(&mut self, connection: ConnectionId, room: &RoomKey) -> Vec<Invitation> {
        self.drain_where(|inv| inv.caller.connection_id == connection && inv.room() == *room)
    }

    /// Drop the invitation from `caller` to `target`, if still ringing.
    pub fn cancel(&mut self, caller: UserId, target: InviteTarget) -> Option<Invitation> {
        self.invitations.remove(&(caller, target))
    }

    /// Drop invitations that have rung for at least `ttl`.
    pub fn expire(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<Invitation> {
        self.drain_where(|inv| now - inv.created_at >= ttl)
    }

    pub fn len(&self) -> usize {
        self.invitations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invitations.is_empty()
    }

    fn drain_where(&mut self, pred: impl Fn(&Invitation) -> bool) -> Vec<Invitation> {
        let keys: Vec<_> = self
            .invitations
            .iter()
            .filter(|(_, inv)| pred(inv))
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| self.invitations.remove(&key))
            .collect()
    }
}
