use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::Deserialize;

use super::{Credential, CredentialSource, Secret};
use crate::error::A2aError;

/// Service name under which keyring entries are stored.
pub const KEYRING_SERVICE: &str = "tether";

type LookupFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Credential>, A2aError>> + Send + 'a>>;

/// Environment variable name for a service identifier.
///
/// `env_key("TETHER", "billing-v2", "API_KEY")` yields `TETHER_BILLING_V2_API_KEY`.
#[must_use]
pub fn env_key(prefix: &str, service: &str, suffix: &str) -> String {
    let normalized: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}_{normalized}_{suffix}")
}

/// In-memory credentials supplied by the caller.
pub struct StaticCredentials {
    entries: HashMap<String, Credential>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new(entries: HashMap<String, Credential>) -> Self {
        Self { entries }
    }
}

impl CredentialSource for StaticCredentials {
    fn name(&self) -> &'static str {
        "static"
    }

    fn lookup(&self, service: &str) -> LookupFuture<'_> {
        let found = self.entries.get(service).cloned();
        Box::pin(async move { Ok(found) })
    }
}

/// `<PREFIX>_<ID>_API_KEY` or `<PREFIX>_<ID>_CLIENT_ID` + `<PREFIX>_<ID>_CLIENT_SECRET`.
pub struct EnvCredentials {
    prefix: String,
}

impl EnvCredentials {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn read(&self, service: &str) -> Result<Option<Credential>, A2aError> {
        let var = |suffix: &str| {
            std::env::var(env_key(&self.prefix, service, suffix))
                .ok()
                .filter(|v| !v.is_empty())
        };

        if let Some(key) = var("API_KEY") {
            return Ok(Some(Credential::ApiKey(Secret::new(key))));
        }
        match (var("CLIENT_ID"), var("CLIENT_SECRET")) {
            (Some(client_id), Some(secret)) => Ok(Some(Credential::OAuth2 {
                client_id,
                client_secret: Secret::new(secret),
            })),
            (None, None) => Ok(None),
            _ => Err(A2aError::auth_config(
                service,
                "environment defines only one of CLIENT_ID and CLIENT_SECRET",
            )),
        }
    }
}

impl CredentialSource for EnvCredentials {
    fn name(&self) -> &'static str {
        "env"
    }

    fn lookup(&self, service: &str) -> LookupFuture<'_> {
        let result = self.read(service);
        Box::pin(async move { result })
    }
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    api_key: Option<Secret>,
    client_id: Option<String>,
    client_secret: Option<Secret>,
}

impl FileEntry {
    fn into_credential(self, service: &str) -> Result<Credential, A2aError> {
        if let Some(key) = self.api_key {
            return Ok(Credential::ApiKey(key));
        }
        match (self.client_id, self.client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(Credential::OAuth2 {
                client_id,
                client_secret,
            }),
            _ => Err(A2aError::auth_config(
                service,
                "credentials file entry needs api_key or client_id and client_secret",
            )),
        }
    }
}

/// TOML file of tables keyed by service identifier.
///
/// ```toml
/// [billing]
/// api_key = "..."
///
/// [planner]
/// client_id = "..."
/// client_secret = "..."
/// ```
///
/// The file is re-read on every lookup so edits apply without a restart.
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self, service: &str) -> Result<Option<Credential>, A2aError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "credentials file not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(A2aError::auth_config(
                    service,
                    format!("failed to read {}: {e}", self.path.display()),
                ));
            }
        };

        let mut entries: HashMap<String, FileEntry> = toml::from_str(&raw).map_err(|e| {
            A2aError::auth_config(
                service,
                format!("failed to parse {}: {e}", self.path.display()),
            )
        })?;

        entries
            .remove(service)
            .map(|entry| entry.into_credential(service))
            .transpose()
    }
}

impl CredentialSource for FileCredentials {
    fn name(&self) -> &'static str {
        "file"
    }

    fn lookup(&self, service: &str) -> LookupFuture<'_> {
        let service = service.to_owned();
        Box::pin(async move { self.read(&service).await })
    }
}

#[derive(Deserialize)]
struct StoredClientCredentials {
    client_id: String,
    client_secret: Secret,
}

/// OS credential store; the user field is the service identifier.
///
/// Values are either a raw API key or a JSON object with `client_id` and
/// `client_secret`. Backend failures are logged and treated as a miss.
pub struct KeyringCredentials {
    keyring_service: String,
}

impl KeyringCredentials {
    #[must_use]
    pub fn new(keyring_service: impl Into<String>) -> Self {
        Self {
            keyring_service: keyring_service.into(),
        }
    }
}

fn parse_stored(value: String) -> Credential {
    if value.trim_start().starts_with('{')
        && let Ok(stored) = serde_json::from_str::<StoredClientCredentials>(&value)
    {
        return Credential::OAuth2 {
            client_id: stored.client_id,
            client_secret: stored.client_secret,
        };
    }
    Credential::ApiKey(Secret::new(value))
}

impl CredentialSource for KeyringCredentials {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn lookup(&self, service: &str) -> LookupFuture<'_> {
        let keyring_service = self.keyring_service.clone();
        let user = service.to_owned();
        Box::pin(async move {
            let lookup_user = user.clone();
            let result = tokio::task::spawn_blocking(move || {
                keyring::Entry::new(&keyring_service, &lookup_user)?.get_password()
            })
            .await;

            match result {
                Ok(Ok(value)) => Ok(Some(parse_stored(value))),
                Ok(Err(keyring::Error::NoEntry)) => Ok(None),
                Ok(Err(e)) => {
                    tracing::warn!(service = %user, "keyring lookup failed: {e}");
                    Ok(None)
                }
                Err(e) => {
                    tracing::warn!(service = %user, "keyring task failed: {e}");
                    Ok(None)
                }
            }
        })
    }
}
