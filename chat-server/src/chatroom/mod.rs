use chrono::{DateTime, Utc};
use shared_types::ChatroomSummary;
use sqlx::SqlitePool;

pub mod handlers;

#[derive(Debug, sqlx::FromRow)]
struct ChatroomRow {
    id: i64,
    user_id: i64,
    created_at: DateTime<Utc>,
}

impl From<ChatroomRow> for ChatroomSummary {
    fn from(row: ChatroomRow) -> Self {
        ChatroomSummary {
            id: row.id,
            user_id: row.user_id,
            created_at: row.created_at,
        }
    }
}

pub async fn create(pool: &SqlitePool, user_id: i64) -> Result<ChatroomSummary, sqlx::Error> {
    let row: ChatroomRow = sqlx::query_as(
        "INSERT INTO chatroom (user_id, created_at) VALUES (?, ?)
         RETURNING id, user_id, created_at",
    )
    .bind(user_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Vec<ChatroomSummary>, sqlx::Error> {
    let rows: Vec<ChatroomRow> = sqlx::query_as(
        "SELECT id, user_id, created_at FROM chatroom WHERE user_id = ? ORDER BY id ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

/// Highest chatroom id owned by `user_id`. Chatrooms are never deleted, so
/// this changes exactly when the user's listing does.
pub async fn latest_id_for_user(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT MAX(id) FROM chatroom WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

/// The chatroom, if it exists and belongs to `user_id`.
pub async fn get_owned(
    pool: &SqlitePool,
    chatroom_id: i64,
    user_id: i64,
) -> Result<Option<ChatroomSummary>, sqlx::Error> {
    let row: Option<ChatroomRow> = sqlx::query_as(
        "SELECT id, user_id, created_at FROM chatroom WHERE id = ? AND user_id = ?",
    )
    .bind(chatroom_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}
