//! Runtime wiring: config resolution, credential resolver, client and server construction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tether_a2a::server::{A2aServer, AgentHandler, InboundAuth};
use tether_a2a::{A2aClient, AgentCard, AgentCardBuilder, CredentialResolver, RetryPolicy};
use tokio::sync::watch;

use crate::config::{Config, ServerAuthScheme};
use crate::http::default_client;

/// Priority: CLI `--config` > `TETHER_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Ok(path) = std::env::var("TETHER_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// Load and validate the config at the resolved path.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed or fails validation.
pub fn load_config(cli: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = resolve_config_path(cli);
    let config = Config::load(&path)?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

#[must_use]
pub fn build_resolver(config: &Config, http: reqwest::Client) -> CredentialResolver {
    let creds = &config.credentials;
    let mut builder = CredentialResolver::builder()
        .with_env(creds.env_prefix.clone())
        .with_keyring(creds.keyring)
        .token_margin(Duration::from_secs(creds.token_margin))
        .http_client(http);
    if let Some(file) = &creds.file {
        builder = builder.with_file(file.clone());
    }
    builder.build()
}

/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn build_client(config: &Config) -> anyhow::Result<A2aClient> {
    let http = default_client(Duration::from_secs(config.client.connect_timeout))?;
    let resolver = Arc::new(build_resolver(config, http.clone()));
    Ok(A2aClient::new(http, resolver)
        .with_request_timeout(Duration::from_secs(config.client.timeout))
        .with_discovery_ttl(Duration::from_secs(config.client.discovery_ttl))
        .with_retry_policy(RetryPolicy {
            max_retries: config.client.max_retries,
            base_backoff: Duration::from_millis(config.client.retry_backoff_ms),
        }))
}

#[must_use]
pub fn agent_card(config: &Config) -> AgentCard {
    let mut builder = AgentCardBuilder::new(
        config.agent.name.clone(),
        config.server.advertised_url(),
        env!("CARGO_PKG_VERSION"),
    )
    .description(config.agent.description.clone())
    .streaming(true);

    builder = match (config.server.auth_scheme, &config.server.token_url) {
        (ServerAuthScheme::None, _) => return builder.build(),
        (ServerAuthScheme::ApiKey, _) => builder.api_key_auth(),
        (ServerAuthScheme::Bearer, Some(token_url)) => builder.oauth2_auth(token_url.clone()),
        // Rejected by `Config::validate`.
        (ServerAuthScheme::Bearer, None) => builder,
    };
    if let Some(id) = &config.server.service_identifier {
        builder = builder.service_identifier(id.clone());
    }
    builder.build()
}

#[must_use]
pub fn inbound_auth(config: &Config) -> InboundAuth {
    let token = config.server.auth_token.clone().unwrap_or_default();
    match config.server.auth_scheme {
        ServerAuthScheme::None => InboundAuth::Open,
        ServerAuthScheme::ApiKey => InboundAuth::ApiKey(token),
        ServerAuthScheme::Bearer => InboundAuth::Bearer(token),
    }
}

#[must_use]
pub fn build_server(
    config: &Config,
    agent: Arc<dyn AgentHandler>,
    shutdown_rx: watch::Receiver<bool>,
) -> A2aServer {
    A2aServer::new(
        agent_card(config),
        agent,
        &config.server.host,
        config.server.port,
        shutdown_rx,
    )
    .with_auth(inbound_auth(config))
    .with_max_body_size(config.server.max_body_size)
}
