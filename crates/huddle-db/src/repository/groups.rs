//! Group roster queries.

use huddle_common::models::{GroupId, UserId};
use sqlx::SqlitePool;

pub async fn exists(pool: &SqlitePool, group: GroupId) -> Result<bool, sqlx::Error> {
    let found = sqlx::query_scalar::<_, i64>("SELECT id FROM groups WHERE id = ?")
        .bind(group)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

pub async fn list_members(pool: &SqlitePool, group: GroupId) -> Result<Vec<UserId>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM group_members WHERE group_id = ? ORDER BY joined_at, user_id",
    )
    .bind(group)
    .fetch_all(pool)
    .await
}
