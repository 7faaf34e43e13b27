//! Task queue backends implementing `fulltext_core::TaskQueue`.
//!
//! `InMemoryTaskQueue` is the default, always-available backend (used by
//! every test in this workspace and by single-node deployments).
//! `RedisTaskQueue` (feature `redis-backend`) is the durable, multi-worker
//! backend, gated the way `monokrome-foiacquire` gates its optional
//! `redis`/`lapin` queue backends behind Cargo features.

use async_trait::async_trait;
use fulltext_core::{Error, Result, TaskQueue, TaskState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One unit of dispatched work, handed to the worker-tier.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskEnvelope {
    pub task_id: String,
    pub task_name: String,
    pub args: serde_json::Value,
}

/// In-process task queue. `publish` records `SENT` state and pushes onto a
/// bounded channel the worker-tier drains; `report` is how the worker-tier
/// writes the terminal state back for `lookup` to observe.
pub struct InMemoryTaskQueue {
    state: Arc<Mutex<HashMap<String, TaskState>>>,
    sender: mpsc::Sender<TaskEnvelope>,
}

impl InMemoryTaskQueue {
    /// Returns the queue handle plus the receiver the worker-tier should
    /// drain. `capacity` bounds how many published-but-undispatched tasks
    /// may queue up before `publish` backpressures.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskEnvelope>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                state: Arc::new(Mutex::new(HashMap::new())),
                sender,
            },
            receiver,
        )
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn publish(
        &self,
        task_id: &str,
        task_name: &str,
        args: serde_json::Value,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.insert(task_id.to_string(), TaskState::InProgress);
        }
        self.sender
            .send(TaskEnvelope {
                task_id: task_id.to_string(),
                task_name: task_name.to_string(),
                args,
            })
            .await
            .map_err(|e| Error::TaskCreationFailed(e.to_string()))
    }

    async fn lookup(&self, task_id: &str) -> Result<TaskState> {
        let state = self.state.lock().await;
        Ok(state.get(task_id).cloned().unwrap_or(TaskState::NoSuchTask))
    }

    async fn report(&self, task_id: &str, new_state: TaskState) -> Result<()> {
        let mut state = self.state.lock().await;
        state.insert(task_id.to_string(), new_state);
        Ok(())
    }

    async fn is_available(&self, _await_result: bool) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(feature = "redis-backend")]
pub mod redis_backend {
    use super::TaskEnvelope;
    use async_trait::async_trait;
    use fulltext_core::{Error, Result, TaskQueue, TaskState};
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    const QUEUE_KEY: &str = "fulltext:tasks";

    fn state_key(task_id: &str) -> String {
        format!("fulltext:task:{task_id}")
    }

    /// Redis-backed `TaskQueue`: per-task state lives in a hash
    /// (`state`, `reason`, `owner`), published tasks are pushed onto a list
    /// the worker-tier `BLPOP`s from.
    pub struct RedisTaskQueue {
        conn: ConnectionManager,
    }

    impl RedisTaskQueue {
        pub async fn connect(url: &str) -> Result<Self> {
            let client =
                redis::Client::open(url).map_err(|e| Error::ConfigurationError(e.to_string()))?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(|e| Error::ConfigurationError(e.to_string()))?;
            Ok(Self { conn })
        }

        /// Blocks (up to `timeout_s`) for the next envelope on the queue.
        pub async fn pop(&self, timeout_s: f64) -> Result<Option<TaskEnvelope>> {
            let mut conn = self.conn.clone();
            let reply: Option<(String, String)> = conn
                .blpop(QUEUE_KEY, timeout_s)
                .await
                .map_err(|e| Error::IoError(e.to_string()))?;
            match reply {
                None => Ok(None),
                Some((_, payload)) => serde_json::from_str(&payload)
                    .map(Some)
                    .map_err(|e| Error::IoError(e.to_string())),
            }
        }
    }

    #[async_trait]
    impl TaskQueue for RedisTaskQueue {
        async fn publish(
            &self,
            task_id: &str,
            task_name: &str,
            args: serde_json::Value,
        ) -> Result<()> {
            let mut conn = self.conn.clone();
            let envelope = TaskEnvelope {
                task_id: task_id.to_string(),
                task_name: task_name.to_string(),
                args,
            };
            let payload = serde_json::to_string(&envelope)
                .map_err(|e| Error::TaskCreationFailed(e.to_string()))?;

            // SENT is set explicitly on publish so lookup can distinguish
            // "enqueued, not started" from "never enqueued" (§4.5).
            let _: () = conn
                .hset(state_key(task_id), "state", "sent")
                .await
                .map_err(|e| Error::TaskCreationFailed(e.to_string()))?;
            let _: () = conn
                .rpush(QUEUE_KEY, payload)
                .await
                .map_err(|e| Error::TaskCreationFailed(e.to_string()))?;
            Ok(())
        }

        async fn lookup(&self, task_id: &str) -> Result<TaskState> {
            let mut conn = self.conn.clone();
            let fields: std::collections::HashMap<String, String> = conn
                .hgetall(state_key(task_id))
                .await
                .map_err(|e| Error::IoError(e.to_string()))?;
            match fields.get("state").map(String::as_str) {
                None | Some("") => Ok(TaskState::NoSuchTask),
                Some("sent") | Some("started") | Some("retry") => Ok(TaskState::InProgress),
                Some("failure") => Ok(TaskState::Failed {
                    reason: fields.get("reason").cloned().unwrap_or_default(),
                }),
                Some("success") => Ok(TaskState::Succeeded {
                    owner: fields.get("owner").cloned(),
                }),
                Some(other) => Err(Error::IoError(format!("unexpected backend state {other}"))),
            }
        }

        async fn report(&self, task_id: &str, new_state: TaskState) -> Result<()> {
            let mut conn = self.conn.clone();
            match new_state {
                TaskState::Failed { reason } => {
                    let _: () = conn
                        .hset_multiple(
                            state_key(task_id),
                            &[("state", "failure"), ("reason", reason.as_str())],
                        )
                        .await
                        .map_err(|e| Error::StorageFailed(e.to_string()))?;
                }
                TaskState::Succeeded { owner } => {
                    let _: () = conn
                        .hset(state_key(task_id), "state", "success")
                        .await
                        .map_err(|e| Error::StorageFailed(e.to_string()))?;
                    if let Some(owner) = owner {
                        let _: () = conn
                            .hset(state_key(task_id), "owner", owner)
                            .await
                            .map_err(|e| Error::StorageFailed(e.to_string()))?;
                    }
                }
                TaskState::InProgress => {
                    let _: () = conn
                        .hset(state_key(task_id), "state", "started")
                        .await
                        .map_err(|e| Error::StorageFailed(e.to_string()))?;
                }
                TaskState::NoSuchTask => {}
            }
            Ok(())
        }

        async fn is_available(&self, _await_result: bool) -> bool {
            let mut conn = self.conn.clone();
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .is_ok()
        }
    }
}
