//! Users repository: profile lookup and presence status.

use huddle_common::models::{Profile, UserId};
use sqlx::SqlitePool;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    avatar: Option<String>,
    status: Option<String>,
}

impl From<UserRow> for Profile {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            avatar: row.avatar,
            status: row.status.unwrap_or_else(|| "Offline".into()),
        }
    }
}

pub async fn find_by_id(pool: &SqlitePool, id: UserId) -> Result<Option<Profile>, sqlx::Error> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, email, avatar, status FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Profile::from))
}

pub async fn update_status(pool: &SqlitePool, id: UserId, status: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET status = ? WHERE id = ?")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{database, insert_user};

    #[tokio::test]
    async fn status_round_trips() {
        let db = database().await;
        let id = insert_user(&db, "alice").await;

        update_status(&db.pool, id, "Offline").await.unwrap();
        let profile = find_by_id(&db.pool, id).await.unwrap().unwrap();
        assert_eq!(profile.username, "alice");
        assert_eq!(profile.status, "Offline");

        assert!(find_by_id(&db.pool, id + 100).await.unwrap().is_none());
    }
}
