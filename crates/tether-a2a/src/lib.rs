#![cfg_attr(not(test), forbid(unsafe_code))]

//! Agent-to-agent task protocol: task lifecycle, JSON-RPC dispatch, SSE event
//! streams and credential resolution for outbound calls.

pub mod card;
pub mod client;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod jsonrpc;
pub mod lifecycle;
#[cfg(feature = "server")]
pub mod server;
pub mod types;

pub use card::AgentCardBuilder;
pub use client::{A2aClient, AgentRef, RetryPolicy, TaskEventStream};
pub use credentials::{Credential, CredentialResolver, CredentialSource, Secret};
pub use discovery::AgentRegistry;
pub use error::A2aError;
pub use lifecycle::TaskState;
pub use types::*;
