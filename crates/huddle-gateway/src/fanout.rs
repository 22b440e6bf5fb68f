//! Chat message fan-out.
//!
//! Every write is persisted first and only then delivered, so a recipient never
//! sees a message that does not exist in storage. When the write fails nothing
//! is delivered and the error goes back to the sender.

use huddle_common::models::{
    ChannelId, ChatMessage, GroupId, MessageDraft, MessageId, Profile, ReactionSummary, UserId,
};
use huddle_common::store::ChatStore;
use huddle_common::validation::{validate_draft, validate_request, ReactionInput};
use huddle_common::{HuddleError, HuddleResult};

use crate::events::ServerEvent;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct MessageFanout<S> {
    store: S,
    registry: ConnectionRegistry,
    max_message_length: usize,
}

impl<S: ChatStore> MessageFanout<S> {
    pub fn new(store: S, registry: ConnectionRegistry, max_message_length: usize) -> Self {
        Self {
            store,
            registry,
            max_message_length,
        }
    }

    /// Persist and broadcast a text-channel message.
    pub async fn post_channel_message(
        &self,
        author: &Profile,
        channel_id: ChannelId,
        draft: &MessageDraft,
    ) -> HuddleResult<ChatMessage> {
        validate_draft(draft, self.max_message_length)?;
        let message = self
            .store
            .create_channel_message(author, channel_id, draft)
            .await?;
        self.deliver_channel_message(channel_id, &message).await;
        Ok(message)
    }

    /// Text channels are public: every connected user receives the message.
    pub async fn deliver_channel_message(&self, channel_id: ChannelId, message: &ChatMessage) -> usize {
        self.registry
            .broadcast(ServerEvent::NewMessage {
                channel_id,
                message: message.clone(),
            })
            .await
    }

    /// Persist a group message and deliver it to the group's online members.
    pub async fn post_group_message(
        &self,
        author: &Profile,
        group_id: GroupId,
        draft: &MessageDraft,
    ) -> HuddleResult<ChatMessage> {
        validate_draft(draft, self.max_message_length)?;
        let members = self.store.group_members(group_id).await?;
        if !members.contains(&author.id) {
            return Err(HuddleError::Unauthorized);
        }
        let message = self.store.create_group_message(author, group_id, draft).await?;
        self.deliver_group_message(group_id, &members, &message).await;
        Ok(message)
    }

    /// Offline members are skipped; they read history on reconnect.
    pub async fn deliver_group_message(
        &self,
        group_id: GroupId,
        members: &[UserId],
        message: &ChatMessage,
    ) -> usize {
        let mut delivered = 0;
        for &member in members {
            let event = ServerEvent::NewGroupMessage {
                group_id,
                message: message.clone(),
            };
            if self.registry.send_to_user(member, event).await {
                delivered += 1;
            }
        }
        tracing::debug!(group = group_id, delivered, "Group message fanned out");
        delivered
    }

    /// Persist a direct message and deliver it to both ends of the thread.
    pub async fn post_direct_message(
        &self,
        author: &Profile,
        receiver_id: UserId,
        draft: &MessageDraft,
    ) -> HuddleResult<ChatMessage> {
        validate_draft(draft, self.max_message_length)?;
        if self.store.find_user(receiver_id).await?.is_none() {
            return Err(HuddleError::not_found(format!("User {receiver_id}")));
        }
        let message = self
            .store
            .create_direct_message(author, receiver_id, draft)
            .await?;
        self.deliver_direct_message(author.id, receiver_id, &message).await;
        Ok(message)
    }

    /// The receiver gets `new-dm` if online. The sender always gets the
    /// `dm-sent` echo, whether or not the receiver was reachable.
    pub async fn deliver_direct_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        message: &ChatMessage,
    ) {
        let reached = self
            .registry
            .send_to_user(
                receiver_id,
                ServerEvent::NewDm {
                    sender_id,
                    message: message.clone(),
                },
            )
            .await;
        if !reached {
            tracing::debug!(receiver = receiver_id, "DM receiver offline; stored only");
        }
        self.registry
            .send_to_user(
                sender_id,
                ServerEvent::DmSent {
                    receiver_id,
                    message: message.clone(),
                },
            )
            .await;
    }

    /// Add or remove a reaction and broadcast the message's new aggregate.
    pub async fn react(
        &self,
        user_id: UserId,
        message_id: MessageId,
        emoji: &str,
        add: bool,
    ) -> HuddleResult<Vec<ReactionSummary>> {
        validate_request(&ReactionInput {
            emoji: emoji.to_string(),
        })?;
        let changed = if add {
            self.store.add_reaction(message_id, user_id, emoji).await?
        } else {
            self.store.remove_reaction(message_id, user_id, emoji).await?
        };
        if !changed {
            tracing::debug!(message = message_id, user = user_id, emoji, add, "Reaction unchanged");
        }
        let reactions = self.store.reactions_for(message_id).await?;
        self.deliver_reaction_update(message_id, &reactions).await;
        Ok(reactions)
    }

    pub async fn deliver_reaction_update(&self, message_id: MessageId, reactions: &[ReactionSummary]) -> usize {
        self.registry
            .broadcast(ServerEvent::ReactionUpdate {
                message_id,
                reactions: reactions.to_vec(),
            })
            .await
    }

    /// Push the current online-user list to everyone.
    pub async fn broadcast_presence(&self) -> usize {
        let users = self.registry.list_all().await;
        self.registry
            .broadcast(ServerEvent::UserListUpdate { users })
            .await
    }
}
