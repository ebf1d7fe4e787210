//! Credential resolution and outbound authentication.
//!
//! A [`CredentialResolver`] walks its sources in a fixed order (explicit
//! overrides, environment, credentials file, OS keyring) and stops at the first
//! hit. OAuth2 client credentials are exchanged for bearer tokens which are
//! cached per service identifier.

mod sources;
mod token;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;

use crate::error::A2aError;
use crate::types::{AgentAuthentication, AuthScheme};

pub use sources::{
    EnvCredentials, FileCredentials, KEYRING_SERVICE, KeyringCredentials, StaticCredentials,
    env_key,
};
pub use token::{BearerToken, DEFAULT_TOKEN_MARGIN, MAX_TOKEN_LIFETIME};
use token::TokenCache;

pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Wrapper for sensitive strings with redacted Debug/Display.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone)]
pub enum Credential {
    ApiKey(Secret),
    OAuth2 {
        client_id: String,
        client_secret: Secret,
    },
}

impl Credential {
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(Secret::new(key))
    }

    #[must_use]
    pub fn oauth2(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::OAuth2 {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::ApiKey(_) => "api key",
            Self::OAuth2 { .. } => "oauth2 client credentials",
        }
    }
}

/// Header to attach to an outbound request.
#[derive(Debug, Clone)]
pub struct AuthHeader {
    pub name: &'static str,
    pub value: Secret,
}

/// Pluggable credential lookup backend.
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn lookup(
        &self,
        service: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Credential>, A2aError>> + Send + '_>>;
}

pub struct CredentialResolver {
    sources: Vec<Box<dyn CredentialSource>>,
    tokens: TokenCache,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("CredentialResolver")
            .field("sources", &names)
            .finish_non_exhaustive()
    }
}

impl CredentialResolver {
    #[must_use]
    pub fn builder() -> CredentialResolverBuilder {
        CredentialResolverBuilder::default()
    }

    /// Resolve the credential for `service`, first source wins.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::AuthConfig`] if no source knows the identifier, or
    /// if a source holds a malformed entry.
    pub async fn resolve(&self, service: &str) -> Result<Credential, A2aError> {
        for source in &self.sources {
            if let Some(credential) = source.lookup(service).await? {
                tracing::debug!(service, source = source.name(), "credential resolved");
                return Ok(credential);
            }
        }
        Err(A2aError::auth_config(service, "no credential found in any source"))
    }

    /// Bearer token for `service`, exchanged against `token_url` when the
    /// cached one is missing or inside the safety margin.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::AuthConfig`] when no OAuth2 client credentials are
    /// available, or the exchange error.
    pub async fn get_token(&self, service: &str, token_url: &str) -> Result<Secret, A2aError> {
        let credential = self.resolve(service).await?;
        self.token_for(service, token_url, &credential).await
    }

    /// Build the auth header required by an agent's declared scheme.
    ///
    /// `credential` overrides resolution for this call only.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::AuthConfig`] before any network I/O when a required
    /// credential is missing or has the wrong kind.
    pub async fn authorize(
        &self,
        auth: &AgentAuthentication,
        service: &str,
        credential: Option<&Credential>,
    ) -> Result<Option<AuthHeader>, A2aError> {
        if auth.scheme == AuthScheme::None {
            return Ok(None);
        }

        let credential = match credential {
            Some(c) => c.clone(),
            None => match self.resolve(service).await {
                Ok(c) => c,
                Err(e) if auth.required => return Err(e),
                Err(_) => {
                    tracing::debug!(service, "optional credential missing, sending unauthenticated");
                    return Ok(None);
                }
            },
        };

        match (auth.scheme, &credential) {
            (AuthScheme::ApiKey, Credential::ApiKey(key)) => Ok(Some(AuthHeader {
                name: API_KEY_HEADER,
                value: key.clone(),
            })),
            (AuthScheme::OAuth2, Credential::OAuth2 { .. }) => {
                let token_url = auth.token_url.as_deref().ok_or_else(|| {
                    A2aError::auth_config(service, "oauth2 scheme declared without a token URL")
                })?;
                let token = self.token_for(service, token_url, &credential).await?;
                Ok(Some(AuthHeader {
                    name: AUTHORIZATION_HEADER,
                    value: Secret::new(format!("Bearer {}", token.expose())),
                }))
            }
            (scheme, other) => Err(A2aError::auth_config(
                service,
                format!("agent expects {scheme:?} but resolved {}", other.kind()),
            )),
        }
    }

    /// Seed the token cache, e.g. with a token obtained out of band.
    pub async fn store_token(&self, service: &str, token: BearerToken) {
        self.tokens.insert(service, token).await;
    }

    /// Drop all cached tokens.
    pub fn close(&self) {
        self.tokens.clear();
    }

    async fn token_for(
        &self,
        service: &str,
        token_url: &str,
        credential: &Credential,
    ) -> Result<Secret, A2aError> {
        let Credential::OAuth2 {
            client_id,
            client_secret,
        } = credential
        else {
            return Err(A2aError::auth_config(
                service,
                "token exchange requires oauth2 client credentials",
            ));
        };
        self.tokens
            .get(service, token_url, client_id, client_secret)
            .await
    }
}

#[derive(Default)]
pub struct CredentialResolverBuilder {
    overrides: HashMap<String, Credential>,
    env_prefix: Option<String>,
    file: Option<PathBuf>,
    keyring: bool,
    token_margin: Option<Duration>,
    http: Option<reqwest::Client>,
}

impl CredentialResolverBuilder {
    #[must_use]
    pub fn with_override(mut self, service: impl Into<String>, credential: Credential) -> Self {
        self.overrides.insert(service.into(), credential);
        self
    }

    /// Enable environment lookup under `prefix` (e.g. `TETHER`).
    #[must_use]
    pub fn with_env(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_keyring(mut self, enabled: bool) -> Self {
        self.keyring = enabled;
        self
    }

    #[must_use]
    pub fn token_margin(mut self, margin: Duration) -> Self {
        self.token_margin = Some(margin);
        self
    }

    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    #[must_use]
    pub fn build(self) -> CredentialResolver {
        let mut sources: Vec<Box<dyn CredentialSource>> = Vec::new();
        if !self.overrides.is_empty() {
            sources.push(Box::new(StaticCredentials::new(self.overrides)));
        }
        if let Some(prefix) = self.env_prefix {
            sources.push(Box::new(EnvCredentials::new(prefix)));
        }
        if let Some(path) = self.file {
            sources.push(Box::new(FileCredentials::new(path)));
        }
        if self.keyring {
            sources.push(Box::new(KeyringCredentials::new(KEYRING_SERVICE)));
        }

        CredentialResolver {
            sources,
            tokens: TokenCache::new(
                self.http.unwrap_or_default(),
                self.token_margin.unwrap_or(DEFAULT_TOKEN_MARGIN),
            ),
        }
    }
}
