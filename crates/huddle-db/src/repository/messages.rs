//! Message writes for channels, groups and direct messages.
//!
//! File attachments are stored as the JSON of the upload reference; the bytes
//! live with the upload service.

use chrono::Utc;
use huddle_common::models::{ChannelId, ChatMessage, GroupId, MessageDraft, Profile, UserId};
use sqlx::SqlitePool;

fn file_json(draft: &MessageDraft) -> Result<Option<String>, sqlx::Error> {
    draft
        .file
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn rendered(id: i64, author: &Profile, draft: &MessageDraft, at: chrono::DateTime<Utc>) -> ChatMessage {
    ChatMessage {
        id,
        author: author.username.clone(),
        avatar: author.avatar.clone(),
        text: draft.text.clone(),
        timestamp: at,
        file: draft.file.clone(),
    }
}

pub async fn create_channel_message(
    pool: &SqlitePool,
    author: &Profile,
    channel: ChannelId,
    draft: &MessageDraft,
) -> Result<ChatMessage, sqlx::Error> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO messages (content, user_id, channel_id, file, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&draft.text)
    .bind(author.id)
    .bind(channel)
    .bind(file_json(draft)?)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(rendered(id, author, draft, now))
}

pub async fn create_group_message(
    pool: &SqlitePool,
    author: &Profile,
    group: GroupId,
    draft: &MessageDraft,
) -> Result<ChatMessage, sqlx::Error> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO group_messages (content, group_id, user_id, file, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&draft.text)
    .bind(group)
    .bind(author.id)
    .bind(file_json(draft)?)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(rendered(id, author, draft, now))
}

pub async fn create_direct_message(
    pool: &SqlitePool,
    author: &Profile,
    receiver: UserId,
    draft: &MessageDraft,
) -> Result<ChatMessage, sqlx::Error> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO direct_messages (content, sender_id, receiver_id, file, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&draft.text)
    .bind(author.id)
    .bind(receiver)
    .bind(file_json(draft)?)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(rendered(id, author, draft, now))
}
