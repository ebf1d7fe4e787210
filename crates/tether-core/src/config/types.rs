use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// How inbound requests to the served agent authenticate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerAuthScheme {
    #[default]
    None,
    ApiKey,
    Bearer,
}

#[derive(Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// URL advertised on the agent card. Derived from host and port when empty.
    #[serde(default)]
    pub public_url: String,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default)]
    pub auth_scheme: ServerAuthScheme,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Where callers obtain bearer tokens; advertised on the card for `bearer`.
    #[serde(default)]
    pub token_url: Option<String>,
    /// Key callers use to look up credentials for this agent.
    #[serde(default)]
    pub service_identifier: Option<String>,
}

impl ServerConfig {
    #[must_use]
    pub fn advertised_url(&self) -> String {
        if self.public_url.is_empty() {
            let host = if self.host == "0.0.0.0" {
                "127.0.0.1"
            } else {
                self.host.as_str()
            };
            format!("http://{host}:{}", self.port)
        } else {
            self.public_url.trim_end_matches('/').to_owned()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: String::new(),
            max_body_size: default_max_body_size(),
            auth_scheme: ServerAuthScheme::None,
            auth_token: None,
            token_url: None,
            service_identifier: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("public_url", &self.public_url)
            .field("max_body_size", &self.max_body_size)
            .field("auth_scheme", &self.auth_scheme)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_url", &self.token_url)
            .field("service_identifier", &self.service_identifier)
            .finish()
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_size() -> usize {
    1_048_576
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            description: String::new(),
        }
    }
}

fn default_agent_name() -> String {
    "tether".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Per-request timeout for unary calls, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Agent card cache lifetime, in seconds.
    #[serde(default = "default_discovery_ttl")]
    pub discovery_ttl: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            discovery_ttl: default_discovery_ttl(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_discovery_ttl() -> u64 {
    300
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CredentialsConfig {
    /// Prefix of `<PREFIX>_<SERVICE>_API_KEY` style variables.
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
    /// TOML file keyed by service identifier.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub keyring: bool,
    /// Refresh bearer tokens this many seconds before they expire.
    #[serde(default = "default_token_margin")]
    pub token_margin: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_prefix: default_env_prefix(),
            file: None,
            keyring: false,
            token_margin: default_token_margin(),
        }
    }
}

fn default_env_prefix() -> String {
    "TETHER".into()
}

fn default_token_margin() -> u64 {
    30
}
