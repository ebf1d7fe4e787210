use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use super::store::TaskStore;
use crate::error::A2aError;
use crate::lifecycle::TaskState;
use crate::types::{A2aEvent, Artifact, Message, Task};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Events served to a subscriber. An `Err` item ends the stream with a
/// FAILED status frame.
pub type EventStream = BoxStream<'static, Result<A2aEvent, A2aError>>;

/// Capability surface an agent implements.
///
/// Only `on_send` is required; the other operations default to the store's
/// behaviour.
pub trait AgentHandler: Send + Sync + 'static {
    /// Process a message for a task that has just moved to `working`.
    ///
    /// Runs on its own background task. Returning `Ok` while the task is still
    /// `working` completes it; returning `Err` fails it.
    fn on_send(&self, ctx: TaskContext, message: Message) -> BoxFuture<'_, Result<(), A2aError>>;

    fn on_get(
        &self,
        store: TaskStore,
        task_id: String,
        history_length: Option<u32>,
    ) -> BoxFuture<'_, Result<Task, A2aError>> {
        Box::pin(async move { store.get_with_history(&task_id, history_length).await })
    }

    fn on_cancel(&self, store: TaskStore, task_id: String) -> BoxFuture<'_, Result<bool, A2aError>> {
        Box::pin(async move { store.cancel(&task_id).await })
    }

    fn on_subscribe(
        &self,
        store: TaskStore,
        task_id: String,
    ) -> BoxFuture<'_, Result<EventStream, A2aError>> {
        Box::pin(async move {
            let subscription = store.subscribe(&task_id).await?;
            Ok(subscription.map(Ok).boxed())
        })
    }
}

/// Handler for a JSON-RPC method beyond the built-in `tasks/*` set.
pub trait CustomMethod: Send + Sync + 'static {
    fn call(
        &self,
        store: TaskStore,
        params: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value, A2aError>>;
}

/// Handle given to `on_send` for reporting progress on one task.
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    store: TaskStore,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(task_id: String, store: TaskStore, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            store,
            cancel,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    #[must_use]
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// # Errors
    ///
    /// Fails if the task has already reached a terminal state.
    pub async fn reply(&self, text: impl Into<String>) -> Result<(), A2aError> {
        self.send_message(Message::assistant_text(text)).await
    }

    /// # Errors
    ///
    /// Fails if the task has already reached a terminal state.
    pub async fn send_message(&self, message: Message) -> Result<(), A2aError> {
        self.store.append_message(&self.task_id, message).await
    }

    /// # Errors
    ///
    /// Fails if the task has already reached a terminal state.
    pub async fn add_artifact(&self, artifact: Artifact) -> Result<(), A2aError> {
        self.store.append_artifact(&self.task_id, artifact).await
    }

    /// Ask the caller for more input; the task waits in `inputRequired`.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::IllegalTransition`] unless the task is `working`.
    pub async fn require_input(&self, prompt: impl Into<String>) -> Result<(), A2aError> {
        let prompt = prompt.into();
        self.reply(prompt.clone()).await?;
        self.store
            .transition(&self.task_id, TaskState::InputRequired, Some(prompt))
            .await
            .map(drop)
    }

    /// # Errors
    ///
    /// Returns [`A2aError::IllegalTransition`] unless the task is `working`.
    pub async fn complete(&self) -> Result<(), A2aError> {
        self.store
            .transition(&self.task_id, TaskState::Completed, None)
            .await
            .map(drop)
    }

    /// # Errors
    ///
    /// Returns [`A2aError::IllegalTransition`] if the task is already terminal.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<(), A2aError> {
        self.store
            .transition(&self.task_id, TaskState::Failed, Some(reason.into()))
            .await
            .map(drop)
    }

    /// `true` once `tasks/cancel` has been accepted for this task.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the task is canceled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Replies with `echo: <text>` and completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAgent;

impl AgentHandler for EchoAgent {
    fn on_send(&self, ctx: TaskContext, message: Message) -> BoxFuture<'_, Result<(), A2aError>> {
        Box::pin(async move {
            let text = message.text_content().unwrap_or_default();
            ctx.reply(format!("echo: {text}")).await
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    async fn working_task(store: &TaskStore) -> TaskContext {
        store.create("t").await.unwrap();
        store.transition("t", TaskState::Working, None).await.unwrap();
        TaskContext::new("t".into(), store.clone(), CancellationToken::new())
    }

    #[tokio::test]
    async fn echo_agent_replies() {
        let store = TaskStore::new();
        let ctx = working_task(&store).await;
        EchoAgent
            .on_send(ctx, Message::user_text("Hello"))
            .await
            .unwrap();

        let task = store.get("t").await.unwrap();
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].text_content(), Some("echo: Hello"));
        // Completion is the processor's job, not the handler's.
        assert_eq!(task.status.state, TaskState::Working);
    }

    #[tokio::test]
    async fn require_input_moves_to_input_required() {
        let store = TaskStore::new();
        let ctx = working_task(&store).await;
        ctx.require_input("which city?").await.unwrap();

        let task = store.get("t").await.unwrap();
        assert_eq!(task.status.state, TaskState::InputRequired);
        assert_eq!(task.status.message.as_deref(), Some("which city?"));
        assert_eq!(task.history[0].text_content(), Some("which city?"));
    }

    #[tokio::test]
    async fn context_reports_cancellation() {
        let store = TaskStore::new();
        store.create("t").await.unwrap();
        let token = CancellationToken::new();
        let ctx = TaskContext::new("t".into(), store, token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn default_operations_use_store() {
        let store = TaskStore::new();
        let ctx = working_task(&store).await;
        ctx.add_artifact(Artifact::text("a.txt", "x")).await.unwrap();

        let task = EchoAgent
            .on_get(store.clone(), "t".into(), None)
            .await
            .unwrap();
        assert_eq!(task.artifacts.len(), 1);

        let mut events = EchoAgent
            .on_subscribe(store.clone(), "t".into())
            .await
            .unwrap();
        assert!(EchoAgent.on_cancel(store.clone(), "t".into()).await.unwrap());
        assert!(!EchoAgent.on_cancel(store, "t".into()).await.unwrap());

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.sse_name(), "status");
        let last = events.next().await.unwrap().unwrap();
        assert!(last.is_terminal());
        assert!(events.next().await.is_none());
    }
}
