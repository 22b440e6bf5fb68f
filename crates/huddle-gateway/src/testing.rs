//! In-memory store and a gateway harness for unit tests.

use chrono::{TimeZone, Utc};
use huddle_common::auth::Claims;
use huddle_common::models::{
    ChannelId, ChatMessage, ConnectionId, GroupId, MessageDraft, MessageId, Profile,
    ReactionSummary, UserId,
};
use huddle_common::store::ChatStore;
use huddle_common::{HuddleError, HuddleResult};
use huddle_voice::{LifecycleEvent, ManualClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::events::ServerEvent;
use crate::registry::{outbound_channel, Outbound, OUTBOUND_BUFFER};
use crate::{GatewayConfig, GatewayState};

#[derive(Default)]
struct Data {
    users: HashMap<UserId, Profile>,
    groups: HashMap<GroupId, Vec<UserId>>,
    messages: Vec<ChatMessage>,
    reactions: Vec<(MessageId, UserId, String)>,
    fail_writes: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Data>>,
}

impl MemoryStore {
    /// The profile for `id`, created on first use.
    pub fn profile(&self, id: UserId) -> Profile {
        self.data
            .lock()
            .unwrap()
            .users
            .entry(id)
            .or_insert_with(|| Profile {
                id,
                username: format!("user{id}"),
                email: format!("user{id}@example.com"),
                avatar: None,
                status: "Offline".into(),
            })
            .clone()
    }

    pub fn status(&self, id: UserId) -> Option<String> {
        self.data.lock().unwrap().users.get(&id).map(|p| p.status.clone())
    }

    pub fn add_group(&self, id: GroupId, members: &[UserId]) {
        self.data.lock().unwrap().groups.insert(id, members.to_vec());
    }

    pub fn fail_writes(&self, fail: bool) {
        self.data.lock().unwrap().fail_writes = fail;
    }

    pub fn stored_messages(&self) -> usize {
        self.data.lock().unwrap().messages.len()
    }

    fn store_message(&self, author: &Profile, draft: &MessageDraft) -> HuddleResult<ChatMessage> {
        let mut data = self.data.lock().unwrap();
        if data.fail_writes {
            return Err(HuddleError::Internal(anyhow::anyhow!("disk full")));
        }
        let message = ChatMessage {
            id: data.messages.len() as MessageId + 1,
            author: author.username.clone(),
            avatar: author.avatar.clone(),
            text: draft.text.clone(),
            timestamp: Utc::now(),
            file: draft.file.clone(),
        };
        data.messages.push(message.clone());
        Ok(message)
    }
}

impl ChatStore for MemoryStore {
    async fn find_user(&self, id: UserId) -> HuddleResult<Option<Profile>> {
        Ok(self.data.lock().unwrap().users.get(&id).cloned())
    }

    async fn set_status(&self, id: UserId, status: &str) -> HuddleResult<()> {
        if let Some(user) = self.data.lock().unwrap().users.get_mut(&id) {
            user.status = status.to_string();
        }
        Ok(())
    }

    async fn group_members(&self, group: GroupId) -> HuddleResult<Vec<UserId>> {
        self.data
            .lock()
            .unwrap()
            .groups
            .get(&group)
            .cloned()
            .ok_or_else(|| HuddleError::not_found(format!("Group {group}")))
    }

    async fn create_channel_message(
        &self,
        author: &Profile,
        _channel: ChannelId,
        draft: &MessageDraft,
    ) -> HuddleResult<ChatMessage> {
        self.store_message(author, draft)
    }

    async fn create_group_message(
        &self,
        author: &Profile,
        _group: GroupId,
        draft: &MessageDraft,
    ) -> HuddleResult<ChatMessage> {
        self.store_message(author, draft)
    }

    async fn create_direct_message(
        &self,
        author: &Profile,
        _receiver: UserId,
        draft: &MessageDraft,
    ) -> HuddleResult<ChatMessage> {
        self.store_message(author, draft)
    }

    async fn add_reaction(&self, message: MessageId, user: UserId, emoji: &str) -> HuddleResult<bool> {
        let mut data = self.data.lock().unwrap();
        let row = (message, user, emoji.to_string());
        if data.reactions.contains(&row) {
            return Ok(false);
        }
        data.reactions.push(row);
        Ok(true)
    }

    async fn remove_reaction(&self, message: MessageId, user: UserId, emoji: &str) -> HuddleResult<bool> {
        let mut data = self.data.lock().unwrap();
        let before = data.reactions.len();
        data.reactions
            .retain(|(m, u, e)| !(*m == message && *u == user && e == emoji));
        Ok(data.reactions.len() != before)
    }

    async fn reactions_for(&self, message: MessageId) -> HuddleResult<Vec<ReactionSummary>> {
        let data = self.data.lock().unwrap();
        let mut summaries: Vec<ReactionSummary> = Vec::new();
        for (_, user, emoji) in data.reactions.iter().filter(|(m, _, _)| *m == message) {
            let username = data
                .users
                .get(user)
                .map(|p| p.username.clone())
                .unwrap_or_default();
            match summaries.iter_mut().find(|s| &s.emoji == emoji) {
                Some(summary) => {
                    summary.count += 1;
                    summary.users.push(username);
                }
                None => summaries.push(ReactionSummary {
                    emoji: emoji.clone(),
                    count: 1,
                    users: vec![username],
                }),
            }
        }
        Ok(summaries)
    }
}

pub const SECRET: &str = "test-secret";

pub struct Client {
    pub id: ConnectionId,
    pub rx: mpsc::Receiver<Outbound>,
}

pub struct Harness {
    pub state: GatewayState<MemoryStore>,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    lifecycle: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::default();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let config = GatewayConfig {
            jwt_secret: SECRET.into(),
            invite_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(15),
            max_message_length: 2000,
        };
        let (state, lifecycle) = GatewayState::new(store.clone(), config, clock.clone());
        Self {
            state,
            store,
            clock,
            lifecycle,
        }
    }

    /// Register a socket for `user` the way the WebSocket handler does.
    pub async fn connect(&self, user: UserId) -> Client {
        let profile = self.store.profile(user);
        let claims = Claims {
            sub: user.to_string(),
            email: profile.email.clone(),
            iat: 0,
            exp: i64::MAX,
        };
        let (tx, out) = outbound_channel(OUTBOUND_BUFFER);
        let id = ConnectionId::new();
        self.state.connect(id, claims, profile, tx).await.unwrap();
        Client { id, rx: out.rx }
    }

    /// Deliver every lifecycle event queued so far, in order.
    pub async fn pump_lifecycle(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.lifecycle.try_recv() {
            self.state.announce(event).await;
            delivered += 1;
        }
        delivered
    }
}

/// Every event queued for a client so far.
pub fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(out) = rx.try_recv() {
        if let Outbound::Event(event) = out {
            events.push(event);
        }
    }
    events
}
