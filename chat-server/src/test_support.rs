//! Fixtures shared by the in-crate unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use shared_types::MessageSnapshot;
use sqlx::SqlitePool;

use crate::auth::users;
use crate::chatroom;
use crate::completion::{CompletionClient, CompletionError};
use crate::messages::store::MessageStore;

/// A migrated SQLite database in a temp directory, removed on drop.
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: tempfile::TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let path = dir.path().join("test.db");
        let url = format!("sqlite:{}", path.display());
        let pool = crate::db::connect(&url, 8)
            .await
            .expect("Failed to open test database");
        Self { pool, _dir: dir }
    }

    /// Create a user and one chatroom they own.
    pub async fn seed_room(&self, phone: &str) -> (i64, i64) {
        let user = users::create_user(&self.pool, phone)
            .await
            .expect("Failed to create user");
        let room = self.seed_extra_room(user.id).await;
        (user.id, room)
    }

    pub async fn seed_extra_room(&self, user_id: i64) -> i64 {
        chatroom::create(&self.pool, user_id)
            .await
            .expect("Failed to create chatroom")
            .id
    }
}

pub async fn message_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(pool)
        .await
        .expect("count query")
}

/// Returns the same result every call and counts calls.
pub struct FixedClient {
    result: Result<String, CompletionError>,
    calls: AtomicUsize,
}

impl FixedClient {
    pub fn ok(reply: &str) -> Self {
        Self {
            result: Ok(reply.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn err(error: CompletionError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for FixedClient {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Replies with the prompt after a short pause, so concurrent calls overlap.
pub struct EchoClient;

#[async_trait]
impl CompletionClient for EchoClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(format!("echo: {prompt}"))
    }
}

pub struct SlowClient(pub Duration);

#[async_trait]
impl CompletionClient for SlowClient {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        tokio::time::sleep(self.0).await;
        Ok("too late".to_string())
    }
}

pub struct PanicClient;

#[async_trait]
impl CompletionClient for PanicClient {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        panic!("provider blew up");
    }
}

/// Reads the message row from inside the remote call, then replies.
pub struct ObservingClient {
    store: MessageStore,
    message_id: i64,
    reply: String,
    observed: Mutex<Option<MessageSnapshot>>,
}

impl ObservingClient {
    pub fn new(pool: SqlitePool, message_id: i64, reply: &str) -> Self {
        Self {
            store: MessageStore::new(pool),
            message_id,
            reply: reply.to_string(),
            observed: Mutex::new(None),
        }
    }

    pub fn observed(&self) -> Option<MessageSnapshot> {
        self.observed.lock().expect("observed lock").clone()
    }
}

#[async_trait]
impl CompletionClient for ObservingClient {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        let snapshot = self
            .store
            .get(self.message_id)
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        *self.observed.lock().expect("observed lock") = snapshot;
        Ok(self.reply.clone())
    }
}
