//! Connection registry: who is connected, and how to reach them.
//!
//! Every live socket has one entry keyed by its [`ConnectionId`]. A user is
//! reachable through at most one connection at a time; a newer login takes
//! over the user's slot and the older socket is told to close.

use chrono::{DateTime, Utc};
use huddle_common::auth::Claims;
use huddle_common::models::{ConnectionId, PresenceEntry, Profile, UserId};
use huddle_common::{HuddleError, HuddleResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, RwLock};

use crate::events::ServerEvent;

/// Close code sent to a connection whose user logged in elsewhere.
pub const SESSION_REPLACED_CLOSE: u16 = 4409;

/// What the writer task of a socket receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    Close { code: u16, reason: String },
}

/// Events a socket may have waiting before it counts as stalled.
pub const OUTBOUND_BUFFER: usize = 64;

/// Outbound half of a connection. Queuing never waits: a full queue marks the
/// connection as stalled and the event is dropped.
#[derive(Debug, Clone)]
pub struct OutboundTx {
    tx: mpsc::Sender<Outbound>,
    stalled: Arc<Notify>,
}

/// Receiving half. The writer task drains `rx`; the connection task watches
/// `stalled` and drops the socket once it fires.
#[derive(Debug)]
pub struct OutboundRx {
    pub rx: mpsc::Receiver<Outbound>,
    pub stalled: Arc<Notify>,
}

pub fn outbound_channel(capacity: usize) -> (OutboundTx, OutboundRx) {
    let (tx, rx) = mpsc::channel(capacity);
    let stalled = Arc::new(Notify::new());
    (
        OutboundTx {
            tx,
            stalled: stalled.clone(),
        },
        OutboundRx { rx, stalled },
    )
}

impl OutboundTx {
    /// Queue `out` without waiting. `false` when the socket is gone or stalled.
    pub fn push(&self, out: Outbound) -> bool {
        match self.tx.try_send(out) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stalled.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

struct Connection {
    info: ConnectionInfo,
    tx: OutboundTx,
}

/// Read-only view of a registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub profile: Profile,
    pub claims: Claims,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn user_id(&self) -> UserId {
        self.profile.id
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    /// The connection currently speaking for each user.
    by_user: HashMap<UserId, ConnectionId>,
}

/// Tracks all live gateway connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly authenticated connection. Returns the connection it
    /// evicted, if the user was already connected.
    pub async fn register(
        &self,
        id: ConnectionId,
        profile: Profile,
        claims: Claims,
        tx: OutboundTx,
    ) -> HuddleResult<Option<ConnectionId>> {
        let mut inner = self.inner.write().await;
        if inner.connections.contains_key(&id) {
            return Err(HuddleError::DuplicateConnection {
                connection_id: id.to_string(),
            });
        }

        let user_id = profile.id;
        let evicted = inner.by_user.insert(user_id, id);
        if let Some(old) = evicted.and_then(|old| inner.connections.get(&old)) {
            old.tx.push(Outbound::Event(ServerEvent::SessionReplaced));
            old.tx.push(Outbound::Close {
                code: SESSION_REPLACED_CLOSE,
                reason: "Session replaced by a newer login".into(),
            });
            tracing::info!(
                user = user_id,
                old = %old.info.id,
                new = %id,
                "Evicting older connection"
            );
        }

        inner.connections.insert(
            id,
            Connection {
                info: ConnectionInfo {
                    id,
                    profile,
                    claims,
                    connected_at: Utc::now(),
                },
                tx,
            },
        );
        Ok(evicted)
    }

    /// Remove a connection. A second call for the same id returns `None`.
    pub async fn unregister(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let mut inner = self.inner.write().await;
        let removed = inner.connections.remove(&id)?;
        let user_id = removed.info.user_id();
        if inner.by_user.get(&user_id) == Some(&id) {
            inner.by_user.remove(&user_id);
        }
        Some(removed.info)
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .map(|c| c.info.clone())
    }

    /// The connection that currently represents `user_id`.
    pub async fn resolve_by_user(&self, user_id: UserId) -> HuddleResult<ConnectionId> {
        self.inner
            .read()
            .await
            .by_user
            .get(&user_id)
            .copied()
            .ok_or(HuddleError::NotConnected { user_id })
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.read().await.by_user.contains_key(&user_id)
    }

    /// Presence snapshot, one entry per online user, oldest connection first.
    pub async fn list_all(&self) -> Vec<PresenceEntry> {
        let inner = self.inner.read().await;
        let mut online: Vec<&ConnectionInfo> = inner
            .by_user
            .values()
            .filter_map(|id| inner.connections.get(id))
            .map(|c| &c.info)
            .collect();
        online.sort_by_key(|info| (info.connected_at, info.id));
        online
            .into_iter()
            .map(|info| PresenceEntry {
                profile: info.profile.clone(),
                connection_id: info.id,
            })
            .collect()
    }

    /// Queue `event` for one connection. `false` when it is gone.
    pub async fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        match inner.connections.get(&id) {
            Some(conn) => conn.tx.push(Outbound::Event(event)),
            None => false,
        }
    }

    /// Queue `event` for a user's current connection, if they are online.
    pub async fn send_to_user(&self, user_id: UserId, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        match inner
            .by_user
            .get(&user_id)
            .and_then(|id| inner.connections.get(id))
        {
            Some(conn) => conn.tx.push(Outbound::Event(event)),
            None => false,
        }
    }

    /// Queue `event` for every online user. Returns how many were reached.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let inner = self.inner.read().await;
        inner
            .by_user
            .values()
            .filter_map(|id| inner.connections.get(id))
            .filter(|conn| conn.tx.push(Outbound::Event(event.clone())))
            .count()
    }

    /// Number of open sockets, including ones that were replaced but have not
    /// finished closing.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}
