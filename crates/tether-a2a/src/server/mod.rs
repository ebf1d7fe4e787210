mod agent;
mod dispatcher;
mod handlers;
mod router;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;

use crate::error::A2aError;
use crate::types::AgentCard;
pub use agent::{AgentHandler, BoxFuture, CustomMethod, EchoAgent, EventStream, TaskContext};
pub use dispatcher::{DispatchOutcome, Dispatcher, error_code};
pub use router::{DEFAULT_MAX_BODY_SIZE, InboundAuth, build_router};
pub use store::{EventSubscription, TaskStore};

#[derive(Clone)]
pub struct AppState {
    pub card: Arc<AgentCard>,
    pub dispatcher: Arc<Dispatcher>,
}

pub struct A2aServer {
    card: AgentCard,
    dispatcher: Dispatcher,
    addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
    auth: InboundAuth,
    max_body_size: usize,
}

impl A2aServer {
    #[must_use]
    pub fn new(
        card: AgentCard,
        agent: Arc<dyn AgentHandler>,
        host: &str,
        port: u16,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let addr: SocketAddr = format!("{host}:{port}").parse().unwrap_or_else(|e| {
            tracing::warn!("invalid host '{host}': {e}, falling back to 0.0.0.0:{port}");
            SocketAddr::from(([0, 0, 0, 0], port))
        });

        Self {
            card,
            dispatcher: Dispatcher::new(agent),
            addr,
            shutdown_rx,
            auth: InboundAuth::Open,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: InboundAuth) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Register a custom JSON-RPC method and advertise it on the card.
    #[must_use]
    pub fn with_method(mut self, name: impl Into<String>, method: Arc<dyn CustomMethod>) -> Self {
        let name = name.into();
        self.dispatcher = self.dispatcher.with_method(name.clone(), method);
        if self.dispatcher.custom_methods().contains(&name)
            && !self.card.capabilities.custom_methods.contains(&name)
        {
            self.card.capabilities.custom_methods.push(name);
        }
        self
    }

    /// Build the router without binding. The dispatcher handle stays usable
    /// for in-process inspection.
    #[must_use]
    pub fn into_router(self) -> (Router, Arc<Dispatcher>) {
        let dispatcher = Arc::new(self.dispatcher);
        let state = AppState {
            card: Arc::new(self.card),
            dispatcher: Arc::clone(&dispatcher),
        };
        (build_router(state, self.auth, self.max_body_size), dispatcher)
    }

    /// Start the HTTP server. Returns when the shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or encounters a fatal I/O error.
    pub async fn serve(self) -> Result<(), A2aError> {
        let addr = self.addr;
        let mut shutdown_rx = self.shutdown_rx.clone();
        let (router, _) = self.into_router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| A2aError::Server(format!("failed to bind {addr}: {e}")))?;
        tracing::info!("A2A server listening on {addr}");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown_rx.borrow_and_update() {
                    if shutdown_rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                tracing::info!("A2A server shutting down");
            })
            .await
            .map_err(|e| A2aError::Server(format!("server error: {e}")))?;

        Ok(())
    }
}
