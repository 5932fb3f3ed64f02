//! Dispatcher: drives one message through
//! `pending -> processing -> (completed | failed)`.
//!
//! A dispatch owns one pooled connection for its whole run (initial read, the
//! processing write, the terminal write). The connection goes back to the pool
//! when the dispatch returns, whichever path it takes.
//!
//! Once a message is claimed, any failure after the claim, a panic included,
//! settles it `failed`.
//!
//! No retries: at most one remote call per dispatch. Dispatching a message that
//! is no longer `pending` is a no-op, so a duplicate launch never re-runs a
//! completed message or overwrites its reply.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use shared_types::MessageStatus;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, error, info, warn};

use crate::completion::{CompletionClient, CompletionError};
use crate::messages::store::{self, StoreError};

/// Failure reason recorded when a claimed dispatch panics.
pub const PANIC_REASON: &str = "dispatch panicked";

/// What a single dispatch did. Only used for logging and tests; the launcher
/// drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No such message. Nothing was written.
    NotFound,
    /// The message could not be read at all, so no failure could be recorded.
    LoadFailed(String),
    /// The message was not `pending`. Nothing was written.
    Skipped(MessageStatus),
    Completed,
    Failed(String),
}

#[derive(Clone)]
pub struct Dispatcher {
    pool: SqlitePool,
    client: Arc<dyn CompletionClient>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(pool: SqlitePool, client: Arc<dyn CompletionClient>, timeout: Duration) -> Self {
        Self {
            pool,
            client,
            timeout,
        }
    }

    pub async fn dispatch(&self, message_id: i64) -> DispatchOutcome {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(message_id, "dispatch could not acquire a connection: {e}");
                return DispatchOutcome::LoadFailed(e.to_string());
            }
        };

        let message = match store::fetch(&mut conn, message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(message_id, "dispatch skipped: message does not exist");
                return DispatchOutcome::NotFound;
            }
            Err(e) => {
                error!(message_id, "dispatch could not load message: {e}");
                return DispatchOutcome::LoadFailed(e.to_string());
            }
        };

        if !message.status.can_transition_to(MessageStatus::Processing) {
            debug!(message_id, status = %message.status, "dispatch skipped: not pending");
            return DispatchOutcome::Skipped(message.status);
        }

        match store::claim(&mut conn, message_id).await {
            Ok(true) => {
                info!(message_id, chatroom_id = message.chatroom_id, "message processing");
            }
            Ok(false) => return observe(&mut conn, message_id).await,
            Err(e) => {
                return self
                    .settle_failed(conn, message_id, format!("processing write failed: {e}"))
                    .await;
            }
        }

        // From here on the row is `processing`; a panic must not leave it there.
        let run = AssertUnwindSafe(self.run_claimed(&mut conn, message_id, &message.content))
            .catch_unwind()
            .await;
        match run {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(reason)) => self.settle_failed(conn, message_id, reason).await,
            Err(_panic) => {
                self.settle_failed(conn, message_id, PANIC_REASON.to_string())
                    .await
            }
        }
    }

    /// Remote call plus the terminal write for a claimed message. `Err` carries
    /// the reason the message has to be settled `failed`.
    async fn run_claimed(
        &self,
        conn: &mut PoolConnection<Sqlite>,
        message_id: i64,
        prompt: &str,
    ) -> Result<DispatchOutcome, String> {
        let reply = match tokio::time::timeout(self.timeout, self.client.complete(prompt)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_elapsed) => return Err(CompletionError::Timeout.to_string()),
        };

        match store::complete(conn, message_id, &reply).await {
            Ok(true) => {
                info!(message_id, reply_len = reply.len(), "message completed");
                Ok(DispatchOutcome::Completed)
            }
            Ok(false) => {
                warn!(message_id, "message left processing before its reply was stored");
                Ok(observe(conn, message_id).await)
            }
            Err(e) => Err(format!("completion write failed: {e}")),
        }
    }

    /// Failure path: mark the message `failed`. If the dispatch connection is
    /// unusable, try once more on a fresh one so the row does not stay in
    /// `processing`.
    async fn settle_failed(
        &self,
        mut conn: PoolConnection<Sqlite>,
        message_id: i64,
        reason: String,
    ) -> DispatchOutcome {
        warn!(message_id, reason = %reason, "message failed");

        let written = match store::fail(&mut conn, message_id).await {
            Ok(written) => Ok(written),
            Err(first) => {
                warn!(message_id, "failed-state write failed, retrying on a fresh connection: {first}");
                drop(conn);
                match self.pool.acquire().await {
                    Ok(mut fresh) => store::fail(&mut fresh, message_id).await,
                    Err(e) => Err(StoreError::from(e)),
                }
            }
        };

        match written {
            Ok(true) => {}
            Ok(false) => debug!(message_id, "message was already terminal or gone"),
            Err(e) => error!(message_id, "could not record failed state: {e}"),
        }
        DispatchOutcome::Failed(reason)
    }
}

/// Report what is there now when a conditional write matched nothing.
async fn observe(conn: &mut PoolConnection<Sqlite>, message_id: i64) -> DispatchOutcome {
    match store::fetch(conn, message_id).await {
        Ok(Some(message)) => DispatchOutcome::Skipped(message.status),
        Ok(None) => DispatchOutcome::NotFound,
        Err(e) => DispatchOutcome::LoadFailed(e.to_string()),
    }
}
