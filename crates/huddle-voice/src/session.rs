//! Call session lifecycle: one state machine per room: Absent → Active → Absent.
//!
//! Transitions are driven only by membership outcomes: a join into an empty
//! room starts a session, the leave that empties it ends the session. Client
//! claims about whether a call is "still active" are never consulted, and the
//! start time is the server's clock at the 0→1 transition.
//!
//! There is no grace period: a room that is empty for any instant ends its
//! session, and the next join starts a new one.

use chrono::{DateTime, Utc};
use huddle_common::models::{ConnectionId, Participant};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::room::{JoinOutcome, LeaveOutcome, RoomKey};

/// An active call in one room.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub started_at: DateTime<Utc>,
    /// Whoever's join made the room non-empty.
    pub initiator: Participant,
    participants: BTreeSet<ConnectionId>,
}

impl CallSession {
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStarted {
    pub room: RoomKey,
    pub started_at: DateTime<Utc>,
    pub initiator: Participant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnded {
    pub room: RoomKey,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: CallDuration,
}

/// Session transitions, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started(CallStarted),
    Ended(CallEnded),
}

impl LifecycleEvent {
    pub fn room(&self) -> &RoomKey {
        match self {
            Self::Started(s) => &s.room,
            Self::Ended(e) => &e.room,
        }
    }
}

/// Whole minutes plus remaining seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDuration {
    pub minutes: u64,
    pub seconds: u64,
}

impl CallDuration {
    /// Floor of the elapsed time; a clock that went backwards counts as zero.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let total = (end - start).num_seconds().max(0) as u64;
        Self {
            minutes: total / 60,
            seconds: total % 60,
        }
    }

    pub fn total_seconds(&self) -> u64 {
        self.minutes * 60 + self.seconds
    }
}

impl fmt::Display for CallDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} minutes {} seconds", self.minutes, self.seconds)
    }
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: HashMap<RoomKey, CallSession>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a membership join. Returns the start event when this join
    /// activated the room.
    pub fn on_join(
        &mut self,
        room: &RoomKey,
        participant: &Participant,
        outcome: JoinOutcome,
        now: DateTime<Utc>,
    ) -> Option<CallStarted> {
        if outcome.already_member {
            return None;
        }

        if let Some(session) = self.sessions.get_mut(room) {
            if outcome.was_empty {
                tracing::warn!(room = %room, "Join into empty room found a live session; keeping it");
            }
            session.participants.insert(participant.connection_id);
            return None;
        }

        if !outcome.was_empty {
            tracing::warn!(room = %room, "Non-empty room had no session; starting one");
        }

        let session = CallSession {
            started_at: now,
            initiator: participant.clone(),
            participants: BTreeSet::from([participant.connection_id]),
        };
        self.sessions.insert(room.clone(), session);

        tracing::info!(room = %room, user = participant.user_id, "Call session started");

        Some(CallStarted {
            room: room.clone(),
            started_at: now,
            initiator: participant.clone(),
        })
    }

    /// Apply a membership leave. Returns the end event when this leave
    /// emptied an active room.
    pub fn on_leave(
        &mut self,
        room: &RoomKey,
        outcome: &LeaveOutcome,
        now: DateTime<Utc>,
    ) -> Option<CallEnded> {
        let removed = outcome.removed.as_ref()?;

        if !outcome.is_empty_now {
            if let Some(session) = self.sessions.get_mut(room) {
                session.participants.remove(&removed.connection_id);
            }
            return None;
        }

        let session = self.sessions.remove(room)?;
        let duration = CallDuration::between(session.started_at, now);

        tracing::info!(room = %room, duration = %duration, "Call session ended");

        Some(CallEnded {
            room: room.clone(),
            started_at: session.started_at,
            ended_at: now,
            duration,
        })
    }

    pub fn session(&self, room: &RoomKey) -> Option<&CallSession> {
        self.sessions.get(room)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}
