//! Outbound side: send tasks to remote agents and consume their event streams.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures_core::Stream;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{OnceCell, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::credentials::{AuthHeader, Credential, CredentialResolver};
use crate::discovery::AgentRegistry;
use crate::error::A2aError;
use crate::jsonrpc::{
    JsonRpcRequest, JsonRpcResponse, METHOD_CANCEL_TASK, METHOD_GET_TASK, METHOD_SEND_TASK,
    METHOD_SUBSCRIBE_TASK, SendTaskParams, SendTaskResult, TaskIdParams,
};
use crate::lifecycle::TaskState;
use crate::types::{A2aEvent, AgentCard, Message, Task};

const DEFAULT_DISCOVERY_TTL: Duration = Duration::from_secs(300);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const EVENT_BUFFER: usize = 64;

/// Where to reach a remote agent.
#[derive(Debug, Clone)]
pub enum AgentRef {
    /// Base URL; the card is fetched from `/.well-known/agent.json`.
    Url(String),
    Card(AgentCard),
}

impl From<AgentCard> for AgentRef {
    fn from(card: AgentCard) -> Self {
        Self::Card(card)
    }
}

impl From<&str> for AgentRef {
    fn from(url: &str) -> Self {
        Self::Url(url.to_owned())
    }
}

impl From<String> for AgentRef {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

/// Replays transient transport failures with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub const NONE: Self = Self {
        max_retries: 0,
        base_backoff: Duration::ZERO,
    };

    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(250),
        }
    }
}

struct Route {
    card: Arc<AgentCard>,
    credential: Option<Credential>,
}

impl Route {
    fn endpoint(&self) -> String {
        format!("{}/a2a", self.card.url.trim_end_matches('/'))
    }
}

pub struct A2aClient {
    http: reqwest::Client,
    registry: AgentRegistry,
    resolver: Arc<CredentialResolver>,
    routes: RwLock<HashMap<String, Arc<Route>>>,
    cancellations: Mutex<HashMap<String, Arc<OnceCell<bool>>>>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl A2aClient {
    /// `http` should carry no overall timeout: it also drives long-lived
    /// event streams. Unary calls get their own per-request timeout.
    #[must_use]
    pub fn new(http: reqwest::Client, resolver: Arc<CredentialResolver>) -> Self {
        Self {
            registry: AgentRegistry::new(http.clone(), DEFAULT_DISCOVERY_TTL),
            http,
            resolver,
            routes: RwLock::new(HashMap::new()),
            cancellations: Mutex::new(HashMap::new()),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_discovery_ttl(mut self, ttl: Duration) -> Self {
        self.registry = AgentRegistry::new(self.http.clone(), ttl);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Fetch (or reuse a cached) agent card.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::Connection`] or [`A2aError::Discovery`].
    pub async fn discover(&self, base_url: &str) -> Result<AgentCard, A2aError> {
        self.registry.get_or_discover(base_url).await
    }

    async fn resolve_agent(&self, agent: AgentRef) -> Result<AgentCard, A2aError> {
        match agent {
            AgentRef::Card(card) => {
                self.registry.register(&card.url, card.clone()).await;
                Ok(card)
            }
            AgentRef::Url(url) => self.discover(&url).await,
        }
    }

    /// Send the first message of a new task and return its id.
    ///
    /// `credential` overrides resolution for this task.
    ///
    /// # Errors
    ///
    /// [`A2aError::AuthConfig`] before any request when the agent requires a
    /// credential that cannot be resolved; [`A2aError::Connection`] on
    /// transport failure; [`A2aError::RemoteAgent`] for a JSON-RPC error.
    pub async fn initiate_task(
        &self,
        agent: impl Into<AgentRef>,
        message: Message,
        credential: Option<Credential>,
    ) -> Result<String, A2aError> {
        let card = self.resolve_agent(agent.into()).await?;
        let route = Arc::new(Route {
            card: Arc::new(card),
            credential,
        });

        let params = SendTaskParams { id: None, message };
        let result: SendTaskResult = self.call(&route, METHOD_SEND_TASK, params, true).await?;

        tracing::info!(task_id = %result.id, agent = %route.card.name, "task initiated");
        self.routes.write().await.insert(result.id.clone(), route);
        Ok(result.id)
    }

    /// Answer a task waiting in `inputRequired`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::initiate_task`], plus [`A2aError::Validation`] for an
    /// untracked task.
    pub async fn continue_task(&self, task_id: &str, message: Message) -> Result<(), A2aError> {
        let route = self.route(task_id).await?;
        let params = SendTaskParams {
            id: Some(task_id.to_owned()),
            message,
        };
        let _: SendTaskResult = self.call(&route, METHOD_SEND_TASK, params, true).await?;
        Ok(())
    }

    /// Route later calls for `task_id` to `agent`, e.g. for a task started elsewhere.
    ///
    /// # Errors
    ///
    /// Returns discovery errors when `agent` is a URL.
    pub async fn track_task(
        &self,
        task_id: &str,
        agent: impl Into<AgentRef>,
        credential: Option<Credential>,
    ) -> Result<(), A2aError> {
        let card = self.resolve_agent(agent.into()).await?;
        self.routes.write().await.insert(
            task_id.to_owned(),
            Arc::new(Route {
                card: Arc::new(card),
                credential,
            }),
        );
        Ok(())
    }

    /// # Errors
    ///
    /// [`A2aError::RemoteAgent`] with code `-32001` for an unknown task.
    pub async fn get_task_status(&self, task_id: &str) -> Result<Task, A2aError> {
        let route = self.route(task_id).await?;
        self.call(&route, METHOD_GET_TASK, TaskIdParams::new(task_id), true)
            .await
    }

    /// Request cancellation. The request is sent at most once per task;
    /// later calls return the first outcome.
    ///
    /// # Errors
    ///
    /// Transport and remote errors; failed attempts are not cached.
    pub async fn terminate_task(&self, task_id: &str) -> Result<bool, A2aError> {
        let route = self.route(task_id).await?;
        let cell = {
            let mut cancellations = self
                .cancellations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cancellations.entry(task_id.to_owned()).or_default())
        };

        let canceled = cell
            .get_or_try_init(|| async {
                let canceled: bool = self
                    .call(&route, METHOD_CANCEL_TASK, TaskIdParams::new(task_id), false)
                    .await?;
                tracing::info!(task_id, canceled, "cancellation delivered");
                Ok::<_, A2aError>(canceled)
            })
            .await?;
        Ok(*canceled)
    }

    /// Drop the route and cancellation record kept for `task_id`.
    ///
    /// Later calls for the task fail until it is tracked again. Returns
    /// `false` if the task was not tracked.
    pub async fn forget_task(&self, task_id: &str) -> bool {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        let removed = self.routes.write().await.remove(task_id).is_some();
        if removed {
            tracing::debug!(task_id, "task forgotten");
        }
        removed
    }

    /// Open the task's event stream.
    ///
    /// # Errors
    ///
    /// Fails if the subscription cannot be established; errors after that are
    /// items of the returned stream.
    pub async fn receive_messages(&self, task_id: &str) -> Result<TaskEventStream, A2aError> {
        let route = self.route(task_id).await?;
        let header = self.authorize(&route).await?;
        let request = JsonRpcRequest::new(METHOD_SUBSCRIBE_TASK, TaskIdParams::new(task_id));

        let mut req = self
            .http
            .post(route.endpoint())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request);
        if let Some(h) = &header {
            req = req.header(h.name, h.value.expose());
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(A2aError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            // An error envelope instead of a stream.
            let rpc: JsonRpcResponse<serde_json::Value> = resp.json().await?;
            let value = rpc.into_result()?;
            return Err(A2aError::Validation(format!(
                "expected an event stream, got {value}"
            )));
        }

        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let events = resp.bytes_stream().eventsource();
        tokio::spawn(read_events(
            task_id.to_owned(),
            Box::pin(events),
            tx,
            token.clone(),
        ));

        tracing::debug!(task_id, "event stream opened");
        Ok(TaskEventStream {
            task_id: task_id.to_owned(),
            rx,
            cancel: token,
        })
    }

    async fn route(&self, task_id: &str) -> Result<Arc<Route>, A2aError> {
        self.routes
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| {
                A2aError::Validation(format!(
                    "task {task_id} is not tracked by this client; call track_task first"
                ))
            })
    }

    async fn authorize(&self, route: &Route) -> Result<Option<AuthHeader>, A2aError> {
        self.resolver
            .authorize(
                &route.card.authentication,
                route.card.service_identifier(),
                route.credential.as_ref(),
            )
            .await
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        route: &Route,
        method: &str,
        params: P,
        retry: bool,
    ) -> Result<R, A2aError> {
        let header = self.authorize(route).await?;
        let request = JsonRpcRequest::new(method, params);
        let endpoint = route.endpoint();

        let mut attempt = 0;
        loop {
            match self.post(&endpoint, &request, header.as_ref()).await {
                Err(e) if retry && e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        method,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        "transient failure, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn post<P: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: &JsonRpcRequest<P>,
        header: Option<&AuthHeader>,
    ) -> Result<R, A2aError> {
        let mut req = self
            .http
            .post(endpoint)
            .timeout(self.request_timeout)
            .json(request);
        if let Some(h) = header {
            req = req.header(h.name, h.value.expose());
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(A2aError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let rpc: JsonRpcResponse<R> = resp.json().await?;
        Ok(rpc.into_result()?)
    }
}

type SseSource = Pin<
    Box<
        dyn Stream<
                Item = Result<
                    eventsource_stream::Event,
                    eventsource_stream::EventStreamError<reqwest::Error>,
                >,
            > + Send,
    >,
>;

/// Pump SSE frames into the channel until the terminal event, a failure, or
/// cancellation. Dropping `tx` on exit ends the consumer's stream once the
/// buffer is drained.
async fn read_events(
    task_id: String,
    mut source: SseSource,
    tx: mpsc::Sender<Result<A2aEvent, A2aError>>,
    token: CancellationToken,
) {
    let mut state: Option<TaskState> = None;
    loop {
        let frame = tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(task_id = %task_id, "event stream canceled");
                return;
            }
            frame = source.next() => frame,
        };

        let item = match frame {
            Some(Ok(frame)) if frame.data.is_empty() => {
                tracing::debug!(
                    task_id = %task_id,
                    event = %frame.event,
                    "skipping frame without data"
                );
                continue;
            }
            Some(Ok(frame)) => match serde_json::from_str::<A2aEvent>(&frame.data) {
                Ok(event) => check_transition(&mut state, event),
                Err(e) => Err(A2aError::Json(e)),
            },
            Some(Err(e)) => Err(A2aError::StreamInterrupted(e.to_string())),
            None => Err(A2aError::StreamInterrupted(
                "connection closed before the terminal event".into(),
            )),
        };

        let last = match &item {
            Ok(event) => event.is_terminal(),
            Err(_) => true,
        };
        if tx.send(item).await.is_err() || last {
            return;
        }
    }
}

/// Reject status events that imply a move the lifecycle forbids.
fn check_transition(
    state: &mut Option<TaskState>,
    event: A2aEvent,
) -> Result<A2aEvent, A2aError> {
    if let A2aEvent::StatusUpdate(update) = &event {
        let next = update.status.state;
        if let Some(current) = *state
            && current != next
        {
            current.transition(next)?;
        }
        *state = Some(next);
    }
    Ok(event)
}

/// Typed, single-pass event sequence for one task.
///
/// Ends after the terminal status event. Dropping it closes the connection.
#[derive(Debug)]
pub struct TaskEventStream {
    task_id: String,
    rx: mpsc::Receiver<Result<A2aEvent, A2aError>>,
    cancel: CancellationToken,
}

impl TaskEventStream {
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Stop reading from the network. Events already buffered are still
    /// yielded, then the stream ends.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle that cancels this stream from elsewhere.
    #[must_use]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for TaskEventStream {
    type Item = Result<A2aEvent, A2aError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for TaskEventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
