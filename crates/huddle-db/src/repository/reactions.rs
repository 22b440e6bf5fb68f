//! Reactions repository: add/remove emoji reactions and aggregate them.

use chrono::Utc;
use huddle_common::models::{MessageId, ReactionSummary, UserId};
use sqlx::SqlitePool;

/// Add a reaction. Returns true if newly added, false if it already existed.
pub async fn add_reaction(
    pool: &SqlitePool,
    message_id: MessageId,
    user_id: UserId,
    emoji: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO reactions (emoji, message_id, user_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(emoji)
    .bind(message_id)
    .bind(user_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove a reaction. Returns true if a row was deleted.
pub async fn remove_reaction(
    pool: &SqlitePool,
    message_id: MessageId,
    user_id: UserId,
    emoji: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM reactions WHERE message_id = ? AND user_id = ? AND emoji = ?",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(emoji)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Emoji → count → usernames for one message. Emojis appear in the order they
/// were first used; usernames in the order they reacted.
pub async fn aggregate(
    pool: &SqlitePool,
    message_id: MessageId,
) -> Result<Vec<ReactionSummary>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT r.emoji, u.username
        FROM reactions r
        JOIN users u ON u.id = r.user_id
        WHERE r.message_id = ?
        ORDER BY r.id
        "#,
    )
    .bind(message_id)
    .fetch_all(pool)
    .await?;

    let mut summaries: Vec<ReactionSummary> = Vec::new();
    for (emoji, username) in rows {
        match summaries.iter_mut().find(|s| s.emoji == emoji) {
            Some(summary) => {
                summary.count += 1;
                summary.users.push(username);
            }
            None => summaries.push(ReactionSummary {
                emoji,
                count: 1,
                users: vec![username],
            }),
        }
    }
    Ok(summaries)
}
