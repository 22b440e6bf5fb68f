//! Persistence contract consumed by the realtime core.
//!
//! Users, messages, groups and reactions live in a relational store owned by
//! other services. The gateway only needs the operations below; `huddle-db`
//! provides the SQLite implementation.

use std::future::Future;

use crate::error::HuddleResult;
use crate::models::{
    ChannelId, ChatMessage, GroupId, MessageDraft, MessageId, Profile, ReactionSummary, UserId,
};

pub trait ChatStore: Clone + Send + Sync + 'static {
    fn find_user(&self, id: UserId) -> impl Future<Output = HuddleResult<Option<Profile>>> + Send;

    fn set_status(&self, id: UserId, status: &str) -> impl Future<Output = HuddleResult<()>> + Send;

    /// Members of `group`; an unknown group yields `NotFound`.
    fn group_members(
        &self,
        group: GroupId,
    ) -> impl Future<Output = HuddleResult<Vec<UserId>>> + Send;

    fn create_channel_message(
        &self,
        author: &Profile,
        channel: ChannelId,
        draft: &MessageDraft,
    ) -> impl Future<Output = HuddleResult<ChatMessage>> + Send;

    fn create_group_message(
        &self,
        author: &Profile,
        group: GroupId,
        draft: &MessageDraft,
    ) -> impl Future<Output = HuddleResult<ChatMessage>> + Send;

    fn create_direct_message(
        &self,
        author: &Profile,
        receiver: UserId,
        draft: &MessageDraft,
    ) -> impl Future<Output = HuddleResult<ChatMessage>> + Send;

    /// Returns false when the user had already reacted with this emoji.
    fn add_reaction(
        &self,
        message: MessageId,
        user: UserId,
        emoji: &str,
    ) -> impl Future<Output = HuddleResult<bool>> + Send;

    /// Returns false when there was nothing to remove.
    fn remove_reaction(
        &self,
        message: MessageId,
        user: UserId,
        emoji: &str,
    ) -> impl Future<Output = HuddleResult<bool>> + Send;

    /// Current aggregate: emoji → count → usernames, in first-reacted order.
    fn reactions_for(
        &self,
        message: MessageId,
    ) -> impl Future<Output = HuddleResult<Vec<ReactionSummary>>> + Send;
}
