//! Task launcher: fire-and-forget hand-off from the request path to the
//! dispatcher.
//!
//! `launch` pushes the message id onto a bounded queue and returns. A single
//! loop drains the queue and spawns one task per message, holding a semaphore
//! permit for the length of the dispatch so at most `workers` dispatches run
//! at once. Callers get no handle; they observe progress by re-reading the
//! message.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("dispatch queue is full ({0} messages waiting)")]
    QueueFull(usize),

    #[error("dispatch queue is closed")]
    Closed,
}

#[derive(Clone)]
pub struct TaskLauncher {
    tx: mpsc::Sender<i64>,
    capacity: usize,
}

/// Owned by the composition root; drains in-flight work on shutdown.
pub struct LauncherHandle {
    join: JoinHandle<()>,
}

impl TaskLauncher {
    pub fn start(
        dispatcher: Dispatcher,
        workers: usize,
        queue_capacity: usize,
    ) -> (Self, LauncherHandle) {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);
        let join = tokio::spawn(run_dispatch_loop(dispatcher, rx, workers));
        info!(workers, queue_capacity, "task launcher started");
        (
            Self {
                tx,
                capacity: queue_capacity,
            },
            LauncherHandle { join },
        )
    }

    /// Schedule `message_id` for dispatch. Never waits.
    pub fn launch(&self, message_id: i64) -> Result<(), LaunchError> {
        self.tx.try_send(message_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LaunchError::QueueFull(self.capacity),
            mpsc::error::TrySendError::Closed(_) => LaunchError::Closed,
        })?;
        debug!(message_id, "message queued for dispatch");
        Ok(())
    }
}

impl LauncherHandle {
    /// Wait for the queue to close and every queued or running dispatch to
    /// finish. The queue closes once every [`TaskLauncher`] clone is dropped.
    pub async fn drain(self) {
        if let Err(e) = self.join.await {
            error!("dispatch loop terminated abnormally: {e}");
        }
    }
}

async fn run_dispatch_loop(dispatcher: Dispatcher, mut rx: mpsc::Receiver<i64>, workers: usize) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut in_flight = JoinSet::new();

    while let Some(message_id) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let dispatcher = dispatcher.clone();
        in_flight.spawn(async move {
            let outcome = dispatcher.dispatch(message_id).await;
            drop(permit);
            debug!(message_id, ?outcome, "dispatch finished");
        });

        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                error!("dispatch task aborted: {e}");
            }
        }
    }

    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            error!("dispatch task aborted: {e}");
        }
    }
    info!("task launcher drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::store::MessageStore;
    use crate::test_support::{EchoClient, FixedClient, SlowClient, TestDb};
    use shared_types::MessageStatus;
    use std::time::Duration;

    async fn wait_for_terminal(store: &MessageStore, id: i64) -> MessageStatus {
        for _ in 0..200 {
            let status = store.get(id).await.unwrap().unwrap().status;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("message {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_launch_returns_before_dispatch_finishes() {
        let db = TestDb::new().await;
        let (user_id, chatroom_id) = db.seed_room("+15553000001").await;
        let store = MessageStore::new(db.pool.clone());
        let msg = store.create_pending(user_id, chatroom_id, "hello").await.unwrap();

        let dispatcher = Dispatcher::new(
            db.pool.clone(),
            Arc::new(SlowClient(Duration::from_millis(200))),
            Duration::from_secs(5),
        );
        let (launcher, handle) = TaskLauncher::start(dispatcher, 2, 8);

        launcher.launch(msg.id).unwrap();
        let right_after = store.get(msg.id).await.unwrap().unwrap();
        assert!(!right_after.status.is_terminal());

        assert_eq!(wait_for_terminal(&store, msg.id).await, MessageStatus::Completed);
        drop(launcher);
        handle.drain().await;
    }

    #[tokio::test]
    async fn test_many_messages_all_settle() {
        let db = TestDb::new().await;
        let (user_id, chatroom_id) = db.seed_room("+15553000002").await;
        let store = MessageStore::new(db.pool.clone());
        let dispatcher = Dispatcher::new(db.pool.clone(), Arc::new(EchoClient), Duration::from_secs(5));
        let (launcher, handle) = TaskLauncher::start(dispatcher, 3, 32);

        let mut ids = Vec::new();
        for i in 0..10 {
            let msg = store
                .create_pending(user_id, chatroom_id, &format!("m{i}"))
                .await
                .unwrap();
            launcher.launch(msg.id).unwrap();
            ids.push(msg.id);
        }

        drop(launcher);
        handle.drain().await;

        for (i, id) in ids.into_iter().enumerate() {
            let row = store.get(id).await.unwrap().unwrap();
            assert_eq!(row.status, MessageStatus::Completed);
            assert_eq!(row.response, Some(format!("echo: m{i}")));
        }
    }

    #[tokio::test]
    async fn test_full_queue_is_reported_not_dropped() {
        let db = TestDb::new().await;
        let dispatcher = Dispatcher::new(
            db.pool.clone(),
            Arc::new(FixedClient::ok("x")),
            Duration::from_secs(5),
        );
        // Fill the queue before the loop gets a chance to drain it.
        let (tx, _rx) = mpsc::channel(1);
        let launcher = TaskLauncher { tx, capacity: 1 };
        launcher.launch(1).unwrap();
        assert_eq!(launcher.launch(2), Err(LaunchError::QueueFull(1)));

        let (closed, handle) = TaskLauncher::start(dispatcher, 1, 1);
        handle.join.abort();
        let _ = handle.join.await;
        assert_eq!(closed.launch(3), Err(LaunchError::Closed));
    }
}
