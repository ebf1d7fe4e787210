//! Authoritative task state plus per-task event fan-out.
//!
//! Each task has its own async mutex. Mutations commit under that mutex and
//! publish their event before releasing it, and `subscribe` registers under the
//! same mutex, so a subscriber sees every event emitted after its snapshot and
//! nothing from before.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures_core::Stream;
use tokio::sync::{RwLock, mpsc};

use crate::error::A2aError;
use crate::lifecycle::TaskState;
use crate::types::{
    A2aEvent, Artifact, Message, Task, TaskArtifactUpdateEvent, TaskMessageEvent, TaskStatus,
};

type Subscribers = HashMap<u64, mpsc::UnboundedSender<A2aEvent>>;

struct TaskEntry {
    task: tokio::sync::Mutex<Task>,
    subscribers: Mutex<Subscribers>,
    next_subscriber: Mutex<u64>,
}

impl TaskEntry {
    fn new(task: Task) -> Self {
        Self {
            task: tokio::sync::Mutex::new(task),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: Mutex::new(0),
        }
    }

    /// Deliver to every live subscriber; close all queues after a terminal event.
    fn publish(&self, event: &A2aEvent) {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|_, tx| tx.send(event.clone()).is_ok());
        if event.is_terminal() {
            subs.clear();
        }
    }

    fn register(&self, tx: mpsc::UnboundedSender<A2aEvent>) -> u64 {
        let id = {
            let mut next = self
                .next_subscriber
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        id
    }

    fn deregister(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Timestamps never go backwards within a task, even if the wall clock does.
fn stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous)
}

#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<String, Arc<TaskEntry>>>>,
}

impl TaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, task_id: &str) -> Result<Arc<TaskEntry>, A2aError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| A2aError::TaskNotFound(task_id.to_owned()))
    }

    /// Register a new task in `submitted`.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::TaskExists`] if the id is already taken.
    pub async fn create(&self, task_id: impl Into<String>) -> Result<Task, A2aError> {
        let task_id = task_id.into();
        if task_id.is_empty() {
            return Err(A2aError::Validation("task id must not be empty".into()));
        }

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task_id) {
            return Err(A2aError::TaskExists(task_id));
        }

        let now = Utc::now();
        let task = Task {
            id: task_id.clone(),
            status: TaskStatus {
                state: TaskState::Submitted,
                timestamp: now,
                message: None,
            },
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            artifacts: Vec::new(),
        };
        tasks.insert(task_id, Arc::new(TaskEntry::new(task.clone())));
        drop(tasks);

        tracing::debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    /// # Errors
    ///
    /// Returns [`A2aError::TaskNotFound`] for an unknown id.
    pub async fn get(&self, task_id: &str) -> Result<Task, A2aError> {
        let entry = self.entry(task_id).await?;
        let task = entry.task.lock().await.clone();
        Ok(task)
    }

    /// Task snapshot with history trimmed to the last `history_length` messages.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::TaskNotFound`] for an unknown id.
    pub async fn get_with_history(
        &self,
        task_id: &str,
        history_length: Option<u32>,
    ) -> Result<Task, A2aError> {
        let mut task = self.get(task_id).await?;
        if let Some(limit) = history_length {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            let len = task.history.len();
            if len > limit {
                task.history.drain(..len - limit);
            }
        }
        Ok(task)
    }

    /// Move a task to `next` and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::TaskNotFound`] or [`A2aError::IllegalTransition`].
    pub async fn transition(
        &self,
        task_id: &str,
        next: TaskState,
        message: Option<String>,
    ) -> Result<Task, A2aError> {
        let entry = self.entry(task_id).await?;
        let mut task = entry.task.lock().await;

        let state = task.status.state.transition(next)?;
        let now = stamp(task.updated_at);
        task.status = TaskStatus {
            state,
            timestamp: now,
            message,
        };
        task.updated_at = now;

        entry.publish(&A2aEvent::status_update(task_id, task.status.clone()));
        tracing::debug!(task_id, state = %state, "task transitioned");
        Ok(task.clone())
    }

    /// Append a message to the history and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::TaskNotFound`], or [`A2aError::Validation`] if the
    /// task is terminal.
    pub async fn append_message(&self, task_id: &str, message: Message) -> Result<(), A2aError> {
        if message.parts.is_empty() {
            return Err(A2aError::Validation("message has no parts".into()));
        }

        let entry = self.entry(task_id).await?;
        let mut task = entry.task.lock().await;
        ensure_open(&task)?;

        let now = stamp(task.updated_at);
        task.updated_at = now;
        task.history.push(message.clone());

        entry.publish(&A2aEvent::Message(TaskMessageEvent {
            task_id: task_id.to_owned(),
            message,
            timestamp: now,
        }));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`A2aError::TaskNotFound`], or [`A2aError::Validation`] if the
    /// task is terminal.
    pub async fn append_artifact(&self, task_id: &str, artifact: Artifact) -> Result<(), A2aError> {
        let entry = self.entry(task_id).await?;
        let mut task = entry.task.lock().await;
        ensure_open(&task)?;

        let now = stamp(task.updated_at);
        task.updated_at = now;
        task.artifacts.push(artifact.clone());

        entry.publish(&A2aEvent::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: task_id.to_owned(),
            artifact,
            timestamp: now,
        }));
        Ok(())
    }

    /// Cancel a task. Returns `false` without side effects if it is already terminal.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::TaskNotFound`] for an unknown id.
    pub async fn cancel(&self, task_id: &str) -> Result<bool, A2aError> {
        let entry = self.entry(task_id).await?;
        let mut task = entry.task.lock().await;

        if task.status.state.is_terminal() {
            return Ok(false);
        }

        let now = stamp(task.updated_at);
        task.status = TaskStatus {
            state: TaskState::Canceled,
            timestamp: now,
            message: None,
        };
        task.updated_at = now;

        entry.publish(&A2aEvent::status_update(task_id, task.status.clone()));
        tracing::info!(task_id, "task canceled");
        Ok(true)
    }

    /// Subscribe to a task's events.
    ///
    /// The first item is always a status event for the current state. A
    /// terminal task yields only that event.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::TaskNotFound`] for an unknown id.
    pub async fn subscribe(&self, task_id: &str) -> Result<EventSubscription, A2aError> {
        let entry = self.entry(task_id).await?;
        let task = entry.task.lock().await;

        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = A2aEvent::status_update(task_id, task.status.clone());
        let terminal = snapshot.is_terminal();
        // Receiver is alive, the send cannot fail.
        let _ = tx.send(snapshot);

        let subscriber = if terminal {
            None
        } else {
            Some(entry.register(tx))
        };
        drop(task);

        Ok(EventSubscription {
            task_id: task_id.to_owned(),
            rx,
            entry: Arc::downgrade(&entry),
            subscriber,
            finished: false,
        })
    }

    /// Number of open subscriptions for a task.
    pub async fn subscriber_count(&self, task_id: &str) -> usize {
        match self.entry(task_id).await {
            Ok(entry) => entry.subscriber_count(),
            Err(_) => 0,
        }
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

fn ensure_open(task: &Task) -> Result<(), A2aError> {
    if task.status.state.is_terminal() {
        Err(A2aError::Validation(format!(
            "task {} is terminal ({})",
            task.id, task.status.state
        )))
    } else {
        Ok(())
    }
}

/// Live event feed for one task. Ends after the terminal status event.
///
/// Dropping it deregisters the subscriber.
#[derive(Debug)]
pub struct EventSubscription {
    task_id: String,
    rx: mpsc::UnboundedReceiver<A2aEvent>,
    entry: Weak<TaskEntry>,
    subscriber: Option<u64>,
    finished: bool,
}

impl EventSubscription {
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Stream for EventSubscription {
    type Item = A2aEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<A2aEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let (Some(id), Some(entry)) = (self.subscriber, self.entry.upgrade()) {
            entry.deregister(id);
        }
    }
}
