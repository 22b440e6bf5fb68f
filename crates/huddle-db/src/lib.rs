//! # huddle-db
//!
//! SQLite persistence for Huddle. The schema is shared with the HTTP service
//! that owns registration, login and uploads; the realtime core only reads
//! profiles and group rosters and writes messages, reactions and presence.

pub mod repository;

use anyhow::Result;
use huddle_common::config::DatabaseConfig;
use huddle_common::models::{
    ChannelId, ChatMessage, GroupId, MessageDraft, MessageId, Profile, ReactionSummary, UserId,
};
use huddle_common::store::ChatStore;
use huddle_common::{HuddleError, HuddleResult};
use repository::{groups, messages, reactions, users};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Shared database handle; cheap to clone.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Open the configured database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        tracing::info!("Connecting to SQLite...");
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        tracing::info!("Connected to SQLite");
        Ok(Self { pool })
    }

    /// A private in-memory database. One connection, so every query sees the
    /// same memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Migrations complete");
        Ok(())
    }
}

impl ChatStore for Database {
    async fn find_user(&self, id: UserId) -> HuddleResult<Option<Profile>> {
        Ok(users::find_by_id(&self.pool, id).await?)
    }

    async fn set_status(&self, id: UserId, status: &str) -> HuddleResult<()> {
        users::update_status(&self.pool, id, status).await?;
        Ok(())
    }

    async fn group_members(&self, group: GroupId) -> HuddleResult<Vec<UserId>> {
        if !groups::exists(&self.pool, group).await? {
            return Err(HuddleError::not_found(format!("Group {group}")));
        }
        Ok(groups::list_members(&self.pool, group).await?)
    }

    async fn create_channel_message(
        &self,
        author: &Profile,
        channel: ChannelId,
        draft: &MessageDraft,
    ) -> HuddleResult<ChatMessage> {
        Ok(messages::create_channel_message(&self.pool, author, channel, draft).await?)
    }

    async fn create_group_message(
        &self,
        author: &Profile,
        group: GroupId,
        draft: &MessageDraft,
    ) -> HuddleResult<ChatMessage> {
        Ok(messages::create_group_message(&self.pool, author, group, draft).await?)
    }

    async fn create_direct_message(
        &self,
        author: &Profile,
        receiver: UserId,
        draft: &MessageDraft,
    ) -> HuddleResult<ChatMessage> {
        Ok(messages::create_direct_message(&self.pool, author, receiver, draft).await?)
    }

    async fn add_reaction(&self, message: MessageId, user: UserId, emoji: &str) -> HuddleResult<bool> {
        Ok(reactions::add_reaction(&self.pool, message, user, emoji).await?)
    }

    async fn remove_reaction(
        &self,
        message: MessageId,
        user: UserId,
        emoji: &str,
    ) -> HuddleResult<bool> {
        Ok(reactions::remove_reaction(&self.pool, message, user, emoji).await?)
    }

    async fn reactions_for(&self, message: MessageId) -> HuddleResult<Vec<ReactionSummary>> {
        Ok(reactions::aggregate(&self.pool, message).await?)
    }
}
