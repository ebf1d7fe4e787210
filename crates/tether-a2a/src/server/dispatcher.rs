//! JSON-RPC method routing and background task processing.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::agent::{AgentHandler, CustomMethod, EventStream, TaskContext};
use super::store::TaskStore;
use crate::error::A2aError;
use crate::jsonrpc::{
    ERR_AGENT_INTERNAL, ERR_INVALID_PARAMS, ERR_INVALID_REQUEST, ERR_METHOD_NOT_FOUND, ERR_PARSE,
    ERR_TASK_NOT_FOUND, JSONRPC_VERSION, JsonRpcError, JsonRpcResponse, METHOD_CANCEL_TASK,
    METHOD_GET_TASK, METHOD_SEND_TASK, METHOD_SUBSCRIBE_TASK, SendTaskParams, SendTaskResult,
    TaskIdParams,
};
use crate::lifecycle::TaskState;
use crate::types::{Message, Task};

pub enum DispatchOutcome {
    Response(JsonRpcResponse<Value>),
    Stream { task_id: String, events: EventStream },
}

type Running = Arc<Mutex<HashMap<String, CancellationToken>>>;

pub struct Dispatcher {
    store: TaskStore,
    agent: Arc<dyn AgentHandler>,
    methods: HashMap<String, Arc<dyn CustomMethod>>,
    running: Running,
}

/// Map a runtime error to its JSON-RPC envelope code.
#[must_use]
pub fn error_code(err: &A2aError) -> i32 {
    match err {
        A2aError::TaskNotFound(_) => ERR_TASK_NOT_FOUND,
        A2aError::Validation(_)
        | A2aError::TaskExists(_)
        | A2aError::IllegalTransition { .. } => ERR_INVALID_PARAMS,
        _ => ERR_AGENT_INTERNAL,
    }
}

fn to_rpc_error(err: &A2aError) -> JsonRpcError {
    JsonRpcError::new(error_code(err), err.to_string())
}

fn parse_params<P: DeserializeOwned>(params: Value) -> Result<P, A2aError> {
    serde_json::from_value(params).map_err(|e| A2aError::Validation(format!("invalid params: {e}")))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("agent panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("agent panicked: {s}")
    } else {
        "agent panicked".to_owned()
    }
}

/// Run agent-supplied code, turning a panic into [`A2aError::AgentServer`].
async fn guarded<T>(fut: impl Future<Output = Result<T, A2aError>>) -> Result<T, A2aError> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let reason = panic_message(panic.as_ref());
            tracing::error!("{reason}");
            Err(A2aError::AgentServer(reason))
        })
}

impl Dispatcher {
    #[must_use]
    pub fn new(agent: Arc<dyn AgentHandler>) -> Self {
        Self::with_store(TaskStore::new(), agent)
    }

    #[must_use]
    pub fn with_store(store: TaskStore, agent: Arc<dyn AgentHandler>) -> Self {
        Self {
            store,
            agent,
            methods: HashMap::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a custom method. Built-in `tasks/*` names cannot be overridden.
    #[must_use]
    pub fn with_method(mut self, name: impl Into<String>, method: Arc<dyn CustomMethod>) -> Self {
        let name = name.into();
        if is_builtin(&name) {
            tracing::warn!(method = %name, "ignoring custom method shadowing a built-in");
            return self;
        }
        self.methods.insert(name, method);
        self
    }

    #[must_use]
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    #[must_use]
    pub fn custom_methods(&self) -> Vec<String> {
        let mut names: Vec<_> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// `true` while a background processor owns the task.
    #[must_use]
    pub fn is_running(&self, task_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_id)
    }

    /// Dispatch one raw JSON-RPC request body.
    pub async fn dispatch(&self, body: &[u8]) -> DispatchOutcome {
        let request: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                return DispatchOutcome::Response(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::new(ERR_PARSE, format!("parse error: {e}")),
                ));
            }
        };
        self.dispatch_value(request).await
    }

    pub async fn dispatch_value(&self, request: Value) -> DispatchOutcome {
        let Value::Object(mut envelope) = request else {
            return DispatchOutcome::Response(JsonRpcResponse::failure(
                Value::Null,
                JsonRpcError::new(ERR_INVALID_REQUEST, "request must be a JSON object"),
            ));
        };

        let id = envelope.remove("id").unwrap_or(Value::Null);
        if envelope.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return failure(id, ERR_INVALID_REQUEST, "jsonrpc must be \"2.0\"");
        }
        let Some(Value::String(method)) = envelope.remove("method") else {
            return failure(id, ERR_INVALID_REQUEST, "method must be a string");
        };
        let params = envelope.remove("params").unwrap_or(Value::Null);

        tracing::debug!(%method, "dispatching request");
        let result = match method.as_str() {
            METHOD_SEND_TASK => match parse_params(params) {
                Ok(p) => self.send_task(p).await.and_then(to_value),
                Err(e) => Err(e),
            },
            METHOD_GET_TASK => match parse_params(params) {
                Ok(p) => self.get_task(p).await.and_then(to_value),
                Err(e) => Err(e),
            },
            METHOD_CANCEL_TASK => match parse_params::<TaskIdParams>(params) {
                Ok(p) => self.cancel_task(&p.id).await.map(Value::Bool),
                Err(e) => Err(e),
            },
            METHOD_SUBSCRIBE_TASK => {
                let subscribed = match parse_params::<TaskIdParams>(params) {
                    Ok(p) => self.subscribe(&p.id).await.map(|events| (p.id, events)),
                    Err(e) => Err(e),
                };
                return match subscribed {
                    Ok((task_id, events)) => DispatchOutcome::Stream { task_id, events },
                    Err(e) => DispatchOutcome::Response(JsonRpcResponse::failure(
                        id,
                        to_rpc_error(&e),
                    )),
                };
            }
            other => match self.methods.get(other) {
                Some(custom) => {
                    guarded(async { custom.call(self.store.clone(), params).await }).await
                }
                None => {
                    return failure(id, ERR_METHOD_NOT_FOUND, format!("unsupported method: {other}"));
                }
            },
        };

        DispatchOutcome::Response(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                tracing::debug!(%method, "request failed: {e}");
                JsonRpcResponse::failure(id, to_rpc_error(&e))
            }
        })
    }

    /// `tasks/send`: create or resume a task and start its processor.
    ///
    /// # Errors
    ///
    /// [`A2aError::TaskNotFound`] when resuming an unknown task,
    /// [`A2aError::Validation`] when it is not awaiting input or still being
    /// processed, [`A2aError::TaskExists`] for a duplicate new id.
    pub async fn send_task(&self, params: SendTaskParams) -> Result<SendTaskResult, A2aError> {
        if params.message.parts.is_empty() {
            return Err(A2aError::Validation("message has no parts".into()));
        }

        match params.id {
            None => {
                let task_id = uuid::Uuid::new_v4().to_string();
                self.store.create(task_id.clone()).await?;
                self.store
                    .append_message(&task_id, params.message.clone())
                    .await?;
                let token = self.claim(&task_id)?;
                self.spawn_processor(task_id.clone(), params.message, token);
                tracing::info!(task_id = %task_id, "task submitted");
                Ok(SendTaskResult { id: task_id })
            }
            Some(task_id) => {
                let task = self.store.get(&task_id).await?;
                if task.status.state != TaskState::InputRequired {
                    return Err(A2aError::Validation(format!(
                        "task {task_id} is {} and cannot accept input",
                        task.status.state
                    )));
                }
                let token = self.claim(&task_id)?;
                if let Err(e) = self
                    .store
                    .append_message(&task_id, params.message.clone())
                    .await
                {
                    self.release(&task_id);
                    return Err(e);
                }
                self.spawn_processor(task_id.clone(), params.message, token);
                tracing::info!(task_id = %task_id, "task resumed");
                Ok(SendTaskResult { id: task_id })
            }
        }
    }

    /// # Errors
    ///
    /// [`A2aError::TaskNotFound`] for an unknown id.
    pub async fn get_task(&self, params: TaskIdParams) -> Result<Task, A2aError> {
        self.store.get(&params.id).await?;
        guarded(async {
            self.agent
                .on_get(self.store.clone(), params.id, params.history_length)
                .await
        })
        .await
    }

    /// `tasks/cancel`: returns `false` if the task was already terminal.
    ///
    /// # Errors
    ///
    /// [`A2aError::TaskNotFound`] for an unknown id.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool, A2aError> {
        self.store.get(task_id).await?;
        let canceled = guarded(async {
            self.agent
                .on_cancel(self.store.clone(), task_id.to_owned())
                .await
        })
        .await?;
        if canceled {
            let token = self
                .running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(task_id)
                .cloned();
            if let Some(token) = token {
                token.cancel();
            }
        }
        Ok(canceled)
    }

    /// # Errors
    ///
    /// [`A2aError::TaskNotFound`] for an unknown id.
    pub async fn subscribe(&self, task_id: &str) -> Result<EventStream, A2aError> {
        self.store.get(task_id).await?;
        guarded(async {
            self.agent
                .on_subscribe(self.store.clone(), task_id.to_owned())
                .await
        })
        .await
    }

    /// Reserve the single processor slot for a task.
    fn claim(&self, task_id: &str) -> Result<CancellationToken, A2aError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.contains_key(task_id) {
            return Err(A2aError::Validation(format!(
                "task {task_id} is still being processed"
            )));
        }
        let token = CancellationToken::new();
        running.insert(task_id.to_owned(), token.clone());
        Ok(token)
    }

    fn release(&self, task_id: &str) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
    }

    fn spawn_processor(&self, task_id: String, message: Message, token: CancellationToken) {
        let store = self.store.clone();
        let agent = Arc::clone(&self.agent);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            run_processor(&store, agent.as_ref(), &task_id, message, token).await;
            running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_id);
        });
    }
}

async fn run_processor(
    store: &TaskStore,
    agent: &dyn AgentHandler,
    task_id: &str,
    message: Message,
    token: CancellationToken,
) {
    if let Err(e) = store.transition(task_id, TaskState::Working, None).await {
        tracing::warn!(task_id, "processor not started: {e}");
        return;
    }

    let ctx = TaskContext::new(task_id.to_owned(), store.clone(), token);
    let outcome = AssertUnwindSafe(agent.on_send(ctx, message))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(panic) => Some(panic_message(panic.as_ref())),
    };

    let state = match store.get(task_id).await {
        Ok(task) => task.status.state,
        Err(e) => {
            tracing::warn!(task_id, "task vanished during processing: {e}");
            return;
        }
    };

    match failure {
        None if state == TaskState::Working => {
            if let Err(e) = store.transition(task_id, TaskState::Completed, None).await {
                tracing::debug!(task_id, "completion skipped: {e}");
            }
        }
        None => tracing::debug!(task_id, state = %state, "processor finished"),
        Some(reason) if !state.is_terminal() => {
            tracing::error!(task_id, "task processing failed: {reason}");
            if let Err(e) = store
                .transition(task_id, TaskState::Failed, Some(reason))
                .await
            {
                tracing::debug!(task_id, "failure not recorded: {e}");
            }
        }
        Some(reason) => {
            tracing::debug!(task_id, state = %state, "processor error after terminal state: {reason}");
        }
    }
}

fn is_builtin(method: &str) -> bool {
    matches!(
        method,
        METHOD_SEND_TASK | METHOD_GET_TASK | METHOD_CANCEL_TASK | METHOD_SUBSCRIBE_TASK
    )
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, A2aError> {
    Ok(serde_json::to_value(value)?)
}

fn failure(id: Value, code: i32, message: impl Into<String>) -> DispatchOutcome {
    DispatchOutcome::Response(JsonRpcResponse::failure(id, JsonRpcError::new(code, message)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::server::testing::{
        AskingAgent, FailingAgent, GatedEchoAgent, PanickingAgent, UntilCanceledAgent,
        wait_for_state, wait_idle,
    };
    use crate::server::agent::{BoxFuture, EchoAgent};
    use crate::types::A2aEvent;

    fn dispatcher(agent: impl AgentHandler) -> Dispatcher {
        Dispatcher::new(Arc::new(agent))
    }

    async fn call(d: &Dispatcher, request: Value) -> JsonRpcResponse<Value> {
        match d.dispatch_value(request).await {
            DispatchOutcome::Response(r) => r,
            DispatchOutcome::Stream { .. } => panic!("expected a JSON response"),
        }
    }

    fn rpc(method: &str, params: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params})
    }

    fn send(text: &str) -> Value {
        rpc(
            METHOD_SEND_TASK,
            json!({"message": {"role": "user", "parts": [{"kind": "text", "text": text}]}}),
        )
    }

    fn error_code_of(resp: &JsonRpcResponse<Value>) -> i32 {
        resp.error.as_ref().map(|e| e.code).unwrap_or_default()
    }

    #[tokio::test]
    async fn parse_error() {
        let d = dispatcher(EchoAgent);
        let DispatchOutcome::Response(resp) = d.dispatch(b"{not json").await else {
            panic!("expected response");
        };
        assert_eq!(error_code_of(&resp), ERR_PARSE);
        assert_eq!(resp.id, Value::Null);
    }

    #[tokio::test]
    async fn invalid_envelopes() {
        let d = dispatcher(EchoAgent);
        let resp = call(&d, json!([1, 2])).await;
        assert_eq!(error_code_of(&resp), ERR_INVALID_REQUEST);

        let resp = call(&d, json!({"jsonrpc": "1.0", "id": 3, "method": "tasks/get"})).await;
        assert_eq!(error_code_of(&resp), ERR_INVALID_REQUEST);
        assert_eq!(resp.id, json!(3));

        let resp = call(&d, json!({"jsonrpc": "2.0", "id": 4, "method": 7})).await;
        assert_eq!(error_code_of(&resp), ERR_INVALID_REQUEST);
    }

    #[tokio::test]
    async fn unknown_method() {
        let d = dispatcher(EchoAgent);
        let resp = call(&d, rpc("tasks/explode", json!({}))).await;
        assert_eq!(error_code_of(&resp), ERR_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_params() {
        let d = dispatcher(EchoAgent);
        let resp = call(&d, rpc(METHOD_SEND_TASK, json!({"message": 5}))).await;
        assert_eq!(error_code_of(&resp), ERR_INVALID_PARAMS);

        let resp = call(&d, rpc(METHOD_GET_TASK, Value::Null)).await;
        assert_eq!(error_code_of(&resp), ERR_INVALID_PARAMS);

        let resp = call(
            &d,
            rpc(METHOD_SEND_TASK, json!({"message": {"role": "user", "parts": []}})),
        )
        .await;
        assert_eq!(error_code_of(&resp), ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let d = dispatcher(EchoAgent);
        let resp = call(&d, rpc(METHOD_GET_TASK, json!({"id": "nope"}))).await;
        assert_eq!(error_code_of(&resp), ERR_TASK_NOT_FOUND);

        let resp = call(&d, rpc(METHOD_CANCEL_TASK, json!({"id": "nope"}))).await;
        assert_eq!(error_code_of(&resp), ERR_TASK_NOT_FOUND);

        let DispatchOutcome::Response(resp) = d
            .dispatch_value(rpc(METHOD_SUBSCRIBE_TASK, json!({"id": "nope"})))
            .await
        else {
            panic!("subscribe to unknown task must not stream");
        };
        assert_eq!(error_code_of(&resp), ERR_TASK_NOT_FOUND);
    }

    #[tokio::test]
    async fn send_returns_fresh_id_and_completes() {
        let d = dispatcher(EchoAgent);
        let resp = call(&d, send("Hello")).await;
        let id = resp.result.unwrap()["id"].as_str().unwrap().to_owned();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let task = wait_for_state(d.store(), &id, TaskState::Completed).await;
        let texts: Vec<_> = task.history.iter().filter_map(Message::text_content).collect();
        assert_eq!(texts, vec!["Hello", "echo: Hello"]);

        let other = call(&d, send("Hello")).await;
        assert_ne!(other.result.unwrap()["id"], json!(id));
    }

    #[tokio::test]
    async fn gated_processor_streams_working_message_completed() {
        let (agent, gate) = GatedEchoAgent::new();
        let d = dispatcher(agent);
        let resp = call(&d, send("Hello")).await;
        let id = resp.result.unwrap()["id"].as_str().unwrap().to_owned();
        wait_for_state(d.store(), &id, TaskState::Working).await;

        let DispatchOutcome::Stream { task_id, events } = d
            .dispatch_value(rpc(METHOD_SUBSCRIBE_TASK, json!({"id": id})))
            .await
        else {
            panic!("expected stream");
        };
        assert_eq!(task_id, id);
        gate.notify_one();

        let events: Vec<A2aEvent> = tokio::time::timeout(
            Duration::from_secs(5),
            events.map(Result::unwrap).collect::<Vec<_>>(),
        )
        .await
        .unwrap();
        let kinds: Vec<_> = events.iter().map(A2aEvent::sse_name).collect();
        assert_eq!(kinds, vec!["status", "message", "status"]);
        match (&events[0], &events[1], &events[2]) {
            (A2aEvent::StatusUpdate(w), A2aEvent::Message(m), A2aEvent::StatusUpdate(c)) => {
                assert_eq!(w.status.state, TaskState::Working);
                assert_eq!(m.message.text_content(), Some("echo: Hello"));
                assert_eq!(c.status.state, TaskState::Completed);
                assert!(c.is_final);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_completed_task_returns_false() {
        let d = dispatcher(EchoAgent);
        let resp = call(&d, send("x")).await;
        let id = resp.result.unwrap()["id"].as_str().unwrap().to_owned();
        let before = wait_for_state(d.store(), &id, TaskState::Completed).await;
        wait_idle(&d, &id).await;

        let resp = call(&d, rpc(METHOD_CANCEL_TASK, json!({"id": id}))).await;
        assert_eq!(resp.result, Some(Value::Bool(false)));
        assert_eq!(d.store().get(&id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn cancel_signals_running_processor() {
        let d = dispatcher(UntilCanceledAgent);
        let resp = call(&d, send("x")).await;
        let id = resp.result.unwrap()["id"].as_str().unwrap().to_owned();
        wait_for_state(d.store(), &id, TaskState::Working).await;
        assert!(d.is_running(&id));

        let resp = call(&d, rpc(METHOD_CANCEL_TASK, json!({"id": id}))).await;
        assert_eq!(resp.result, Some(Value::Bool(true)));
        wait_idle(&d, &id).await;
        // The handler's error after cancel must not overwrite the terminal state.
        assert_eq!(
            d.store().get(&id).await.unwrap().status.state,
            TaskState::Canceled
        );
    }

    #[tokio::test]
    async fn handler_error_fails_task() {
        let d = dispatcher(FailingAgent);
        let resp = call(&d, send("x")).await;
        let id = resp.result.unwrap()["id"].as_str().unwrap().to_owned();
        let task = wait_for_state(d.store(), &id, TaskState::Failed).await;
        assert!(task.status.message.unwrap().contains("processing failed"));
    }

    #[tokio::test]
    async fn handler_panic_fails_task() {
        let d = dispatcher(PanickingAgent);
        let resp = call(&d, send("x")).await;
        let id = resp.result.unwrap()["id"].as_str().unwrap().to_owned();
        let task = wait_for_state(d.store(), &id, TaskState::Failed).await;
        assert!(task.status.message.unwrap().contains("agent panicked"));
        wait_idle(&d, &id).await;
    }

    #[tokio::test]
    async fn resume_requires_input_required_state() {
        let d = dispatcher(AskingAgent);
        let resp = call(&d, send("plan a trip")).await;
        let id = resp.result.unwrap()["id"].as_str().unwrap().to_owned();
        wait_for_state(d.store(), &id, TaskState::InputRequired).await;
        wait_idle(&d, &id).await;

        let resume = json!({
            "id": id,
            "message": {"role": "user", "parts": [{"kind": "text", "text": "Paris"}]}
        });
        let resp = call(&d, rpc(METHOD_SEND_TASK, resume.clone())).await;
        assert_eq!(resp.result.unwrap()["id"], json!(id));

        let task = wait_for_state(d.store(), &id, TaskState::Completed).await;
        assert_eq!(
            task.history.last().and_then(Message::text_content),
            Some("booked: Paris")
        );
        wait_idle(&d, &id).await;

        let resp = call(&d, rpc(METHOD_SEND_TASK, resume)).await;
        assert_eq!(error_code_of(&resp), ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn resume_unknown_task_is_not_found() {
        let d = dispatcher(EchoAgent);
        let resp = call(
            &d,
            rpc(
                METHOD_SEND_TASK,
                json!({"id": "ghost", "message": {"role": "user", "parts": [{"kind": "text", "text": "x"}]}}),
            ),
        )
        .await;
        assert_eq!(error_code_of(&resp), ERR_TASK_NOT_FOUND);
    }

    #[tokio::test]
    async fn get_honours_history_length() {
        let d = dispatcher(EchoAgent);
        let resp = call(&d, send("Hello")).await;
        let id = resp.result.unwrap()["id"].as_str().unwrap().to_owned();
        wait_for_state(d.store(), &id, TaskState::Completed).await;

        let resp = call(&d, rpc(METHOD_GET_TASK, json!({"id": id, "historyLength": 1}))).await;
        let task: Task = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].text_content(), Some("echo: Hello"));
    }

    struct CountTasks;

    impl CustomMethod for CountTasks {
        fn call(&self, store: TaskStore, _params: Value) -> BoxFuture<'_, Result<Value, A2aError>> {
            Box::pin(async move { Ok(json!(store.len().await)) })
        }
    }

    #[tokio::test]
    async fn custom_methods_are_routed() {
        let d = dispatcher(EchoAgent)
            .with_method("admin/count", Arc::new(CountTasks))
            .with_method(METHOD_GET_TASK, Arc::new(CountTasks));
        assert_eq!(d.custom_methods(), vec!["admin/count"]);

        d.store().create("a").await.unwrap();
        let resp = call(&d, rpc("admin/count", Value::Null)).await;
        assert_eq!(resp.result, Some(json!(1)));

        // Built-ins are not shadowed.
        let resp = call(&d, rpc(METHOD_GET_TASK, json!({"id": "a"}))).await;
        assert_eq!(resp.result.unwrap()["id"], "a");
    }

    fn explode<T>(what: &str) -> Result<T, A2aError> {
        panic!("{what}")
    }

    struct Boom;

    impl CustomMethod for Boom {
        fn call(&self, _store: TaskStore, _params: Value) -> BoxFuture<'_, Result<Value, A2aError>> {
            Box::pin(async { explode::<Value>("custom boom") })
        }
    }

    #[tokio::test]
    async fn custom_method_panic_becomes_internal_error() {
        let d = dispatcher(EchoAgent).with_method("x/boom", Arc::new(Boom));
        let resp = call(&d, rpc("x/boom", Value::Null)).await;
        assert_eq!(error_code_of(&resp), ERR_AGENT_INTERNAL);
        assert!(resp.error.unwrap().message.contains("custom boom"));

        // The dispatcher keeps serving after the panic.
        let resp = call(&d, rpc(METHOD_GET_TASK, json!({"id": "nope"}))).await;
        assert_eq!(error_code_of(&resp), ERR_TASK_NOT_FOUND);
    }

    /// Overrides the read-side operations, counting calls and panicking in `on_get`.
    struct CountingAgent {
        calls: Arc<AtomicUsize>,
    }

    impl AgentHandler for CountingAgent {
        fn on_send(&self, _ctx: TaskContext, _message: Message) -> BoxFuture<'_, Result<(), A2aError>> {
            Box::pin(async { Ok(()) })
        }

        fn on_get(
            &self,
            _store: TaskStore,
            task_id: String,
            _history_length: Option<u32>,
        ) -> BoxFuture<'_, Result<Task, A2aError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { explode::<Task>(&format!("on_get for {task_id}")) })
        }

        fn on_cancel(&self, _store: TaskStore, _task_id: String) -> BoxFuture<'_, Result<bool, A2aError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(false) })
        }

        fn on_subscribe(
            &self,
            _store: TaskStore,
            _task_id: String,
        ) -> BoxFuture<'_, Result<EventStream, A2aError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(futures::stream::empty::<Result<A2aEvent, A2aError>>().boxed()) })
        }
    }

    #[tokio::test]
    async fn unknown_ids_never_reach_agent_overrides() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(CountingAgent {
            calls: Arc::clone(&calls),
        });

        let resp = call(&d, rpc(METHOD_GET_TASK, json!({"id": "nope"}))).await;
        assert_eq!(error_code_of(&resp), ERR_TASK_NOT_FOUND);
        let resp = call(&d, rpc(METHOD_CANCEL_TASK, json!({"id": "nope"}))).await;
        assert_eq!(error_code_of(&resp), ERR_TASK_NOT_FOUND);
        let DispatchOutcome::Response(resp) = d
            .dispatch_value(rpc(METHOD_SUBSCRIBE_TASK, json!({"id": "nope"})))
            .await
        else {
            panic!("subscribe to unknown task must not stream");
        };
        assert_eq!(error_code_of(&resp), ERR_TASK_NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        d.store().create("known").await.unwrap();
        let resp = call(&d, rpc(METHOD_CANCEL_TASK, json!({"id": "known"}))).await;
        assert_eq!(resp.result, Some(Value::Bool(false)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn agent_get_panic_becomes_internal_error() {
        let d = dispatcher(CountingAgent {
            calls: Arc::new(AtomicUsize::new(0)),
        });
        d.store().create("known").await.unwrap();
        let resp = call(&d, rpc(METHOD_GET_TASK, json!({"id": "known"}))).await;
        assert_eq!(error_code_of(&resp), ERR_AGENT_INTERNAL);
        assert!(resp.error.unwrap().message.contains("on_get for known"));
    }

    #[test]
    fn error_codes() {
        assert_eq!(error_code(&A2aError::TaskNotFound("t".into())), ERR_TASK_NOT_FOUND);
        assert_eq!(
            error_code(&A2aError::IllegalTransition {
                from: TaskState::Completed,
                to: TaskState::Working
            }),
            ERR_INVALID_PARAMS
        );
        assert_eq!(error_code(&A2aError::Validation("x".into())), ERR_INVALID_PARAMS);
        assert_eq!(error_code(&A2aError::AgentServer("x".into())), ERR_AGENT_INTERNAL);
        let json_err = serde_json::from_str::<Value>("{").unwrap_err();
        assert_eq!(error_code(&A2aError::Json(json_err)), ERR_AGENT_INTERNAL);
    }
}
