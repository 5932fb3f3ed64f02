//! Message persistence.
//!
//! Two access paths share the same SQL:
//!
//! - [`MessageStore`] works off the pool and serves request handlers
//!   (submission and status polling).
//! - The free functions ([`fetch`], [`claim`], [`complete`], [`fail`]) run on a
//!   caller-owned connection. The dispatcher uses them so that one dispatch
//!   touches exactly one connection of its own.
//!
//! Every state change is one conditional `UPDATE`, so a reader sees either the
//! old row or the new row, never a status without its reply.

use chrono::{DateTime, Utc};
use shared_types::{MessageSnapshot, MessageStatus};
use sqlx::{SqliteConnection, SqlitePool};

const MESSAGE_COLUMNS: &str =
    "id, chatroom_id, user_id, content, response, status, created_at, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Message {id} has unknown status '{status}'")]
    CorruptStatus { id: i64, status: String },
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    chatroom_id: i64,
    user_id: i64,
    content: String,
    response: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for MessageSnapshot {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<MessageStatus>()
            .map_err(|_| StoreError::CorruptStatus {
                id: row.id,
                status: row.status.clone(),
            })?;
        Ok(MessageSnapshot {
            id: row.id,
            user_id: row.user_id,
            chatroom_id: row.chatroom_id,
            content: row.content,
            response: row.response,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Load one message on the given connection.
pub async fn fetch(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<MessageSnapshot>, StoreError> {
    let row: Option<MessageRow> =
        sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    row.map(MessageSnapshot::try_from).transpose()
}

/// `pending -> processing`. Returns `false` when the row is missing or no
/// longer pending.
pub async fn claim(conn: &mut SqliteConnection, id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE messages SET status = 'processing', updated_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `processing -> completed`, writing the reply in the same statement.
pub async fn complete(
    conn: &mut SqliteConnection,
    id: i64,
    reply: &str,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE messages SET status = 'completed', response = ?, updated_at = ?
         WHERE id = ? AND status = 'processing'",
    )
    .bind(reply)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Any non-terminal state -> `failed`. The reply stays absent.
///
/// Accepts `pending` as a source for the two fault paths that never reach
/// `processing`: a processing write that faulted, and a message the launcher
/// refused to schedule.
pub async fn fail(conn: &mut SqliteConnection, id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE messages SET status = 'failed', response = NULL, updated_at = ?
         WHERE id = ? AND status IN ('pending', 'processing')",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Pool-backed read/create API used by the HTTP layer.
#[derive(Debug, Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new message in `pending` with no reply.
    pub async fn create_pending(
        &self,
        user_id: i64,
        chatroom_id: i64,
        content: &str,
    ) -> Result<MessageSnapshot, StoreError> {
        let now = Utc::now();
        let row: MessageRow = sqlx::query_as(&format!(
            "INSERT INTO messages (chatroom_id, user_id, content, response, status, created_at, updated_at)
             VALUES (?, ?, ?, NULL, 'pending', ?, ?)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(chatroom_id)
        .bind(user_id)
        .bind(content)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get(&self, id: i64) -> Result<Option<MessageSnapshot>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// All messages of a chatroom in submission order.
    pub async fn list_for_chatroom(
        &self,
        chatroom_id: i64,
    ) -> Result<Vec<MessageSnapshot>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chatroom_id = ? ORDER BY id ASC"
        ))
        .bind(chatroom_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MessageSnapshot::try_from).collect()
    }
}
