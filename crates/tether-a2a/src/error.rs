use crate::jsonrpc::JsonRpcError;
use crate::lifecycle::TaskState;

#[derive(Debug, thiserror::Error)]
pub enum A2aError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("task already exists: {0}")]
    TaskExists(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: TaskState, to: TaskState },

    #[error("authentication not configured for {service}: {reason}")]
    AuthConfig { service: String, reason: String },

    #[error("connection to remote agent failed: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("remote agent returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("remote agent error {code}: {message}")]
    RemoteAgent {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("event stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("agent handler failed: {0}")]
    AgentServer(String),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("agent discovery failed for {url}: {reason}")]
    Discovery { url: String, reason: String },

    #[error("server error: {0}")]
    Server(String),
}

impl A2aError {
    /// Transport-level failures that a retry policy may replay.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_connect() || e.is_timeout(),
            Self::HttpStatus { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    pub(crate) fn auth_config(service: &str, reason: impl Into<String>) -> Self {
        Self::AuthConfig {
            service: service.to_owned(),
            reason: reason.into(),
        }
    }
}

impl From<JsonRpcError> for A2aError {
    fn from(e: JsonRpcError) -> Self {
        Self::RemoteAgent {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_jsonrpc_error() {
        let rpc_err = JsonRpcError {
            code: -32001,
            message: "task not found".into(),
            data: Some(serde_json::json!({"id": "t-1"})),
        };
        let err: A2aError = rpc_err.into();
        match err {
            A2aError::RemoteAgent {
                code,
                message,
                data,
            } => {
                assert_eq!(code, -32001);
                assert_eq!(message, "task not found");
                assert_eq!(data.unwrap()["id"], "t-1");
            }
            _ => panic!("expected RemoteAgent variant"),
        }
    }

    #[test]
    fn error_display() {
        let err = A2aError::Discovery {
            url: "http://example.com".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "agent discovery failed for http://example.com: connection refused"
        );

        let err = A2aError::StreamInterrupted("unexpected EOF".into());
        assert_eq!(err.to_string(), "event stream interrupted: unexpected EOF");
    }

    #[test]
    fn illegal_transition_display() {
        let err = A2aError::IllegalTransition {
            from: TaskState::Completed,
            to: TaskState::Working,
        };
        assert_eq!(
            err.to_string(),
            "illegal transition from completed to working"
        );
    }

    #[test]
    fn auth_config_display() {
        let err = A2aError::auth_config("billing", "no credential found");
        assert_eq!(
            err.to_string(),
            "authentication not configured for billing: no credential found"
        );
    }

    #[test]
    fn transient_classification() {
        let gateway = A2aError::HttpStatus {
            status: 503,
            body: String::new(),
        };
        assert!(gateway.is_transient());

        let remote = A2aError::RemoteAgent {
            code: -32603,
            message: "boom".into(),
            data: None,
        };
        assert!(!remote.is_transient());
        assert!(!A2aError::TaskNotFound("t".into()).is_transient());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: A2aError = json_err.into();
        assert!(matches!(err, A2aError::Json(_)));
    }
}
