use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use super::Secret;
use crate::error::A2aError;

/// Tokens expiring within this window are refreshed before use.
pub const DEFAULT_TOKEN_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 300;

/// Upper bound on a cached token's lifetime, whatever `expires_in` claims.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct BearerToken {
    pub access_token: Secret,
    pub expires_at: Instant,
}

impl BearerToken {
    /// `ttl` is capped at [`MAX_TOKEN_LIFETIME`].
    #[must_use]
    pub fn new(access_token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            access_token: Secret::new(access_token),
            expires_at: Instant::now() + ttl.min(MAX_TOKEN_LIFETIME),
        }
    }

    fn is_fresh(&self, margin: Duration) -> bool {
        self.expires_at.saturating_duration_since(Instant::now()) > margin
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

type Slot = Arc<tokio::sync::Mutex<Option<BearerToken>>>;

/// Per-service token cache. Each service has its own async lock so
/// concurrent callers share one exchange.
pub(super) struct TokenCache {
    http: reqwest::Client,
    margin: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl TokenCache {
    pub(super) fn new(http: reqwest::Client, margin: Duration) -> Self {
        Self {
            http,
            margin,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, service: &str) -> Slot {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(slots.entry(service.to_owned()).or_default())
    }

    pub(super) async fn get(
        &self,
        service: &str,
        token_url: &str,
        client_id: &str,
        client_secret: &Secret,
    ) -> Result<Secret, A2aError> {
        let slot = self.slot(service);
        let mut cached = slot.lock().await;

        if let Some(token) = cached.as_ref()
            && token.is_fresh(self.margin)
        {
            return Ok(token.access_token.clone());
        }

        let fresh = self
            .exchange(service, token_url, client_id, client_secret)
            .await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    pub(super) async fn insert(&self, service: &str, token: BearerToken) {
        let slot = self.slot(service);
        *slot.lock().await = Some(token);
    }

    pub(super) fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    async fn exchange(
        &self,
        service: &str,
        token_url: &str,
        client_id: &str,
        client_secret: &Secret,
    ) -> Result<BearerToken, A2aError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", client_id)
            .append_pair("client_secret", client_secret.expose())
            .finish();

        tracing::debug!(service, token_url, "exchanging client credentials");
        let resp = self
            .http
            .post(token_url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(service, status = status.as_u16(), "token exchange rejected");
            return Err(A2aError::auth_config(
                service,
                format!("token endpoint returned HTTP {}: {body}", status.as_u16()),
            ));
        }

        let token: TokenResponse = resp.json().await?;
        let ttl = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));
        Ok(BearerToken::new(token.access_token, ttl))
    }
}
