use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::A2aError;
use crate::types::AgentCard;

pub const WELL_KNOWN_PATH: &str = "/.well-known/agent.json";

struct CachedCard {
    card: AgentCard,
    fetched_at: Instant,
}

/// Agent card cache keyed by base URL.
pub struct AgentRegistry {
    client: reqwest::Client,
    cache: RwLock<HashMap<String, CachedCard>>,
    ttl: Duration,
}

fn cache_key(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_owned()
}

impl AgentRegistry {
    #[must_use]
    pub fn new(client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch `<base_url>/.well-known/agent.json` and cache it.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::Connection`] on network failure or
    /// [`A2aError::Discovery`] on non-2xx / parse failure.
    pub async fn discover(&self, base_url: &str) -> Result<AgentCard, A2aError> {
        let key = cache_key(base_url);
        let url = format!("{key}{WELL_KNOWN_PATH}");
        tracing::debug!(%url, "fetching agent card");
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(A2aError::Discovery {
                url,
                reason: format!("HTTP {}", resp.status()),
            });
        }

        let card: AgentCard = resp.json().await.map_err(|e| A2aError::Discovery {
            url,
            reason: e.to_string(),
        })?;

        self.store(key, card.clone()).await;
        Ok(card)
    }

    /// # Errors
    ///
    /// Returns [`A2aError`] if the cached card is stale and the re-fetch fails.
    pub async fn get_or_discover(&self, base_url: &str) -> Result<AgentCard, A2aError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&cache_key(base_url))
                && entry.fetched_at.elapsed() < self.ttl
            {
                return Ok(entry.card.clone());
            }
        }
        self.discover(base_url).await
    }

    /// Seed the cache with a card obtained out of band.
    pub async fn register(&self, base_url: &str, card: AgentCard) {
        self.store(cache_key(base_url), card).await;
    }

    /// Insert a card, dropping every entry past its TTL.
    async fn store(&self, key: String, card: AgentCard) {
        let mut cache = self.cache.write().await;
        cache.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        cache.insert(
            key,
            CachedCard {
                card,
                fetched_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::card::AgentCardBuilder;

    fn test_card(name: &str) -> AgentCard {
        AgentCardBuilder::new(name, "http://localhost", "0.1.0")
            .description("test")
            .build()
    }

    #[tokio::test]
    async fn discover_fetches_well_known_card() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(WELL_KNOWN_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(
                    AgentCardBuilder::new("remote", server.uri(), "1.0.0")
                        .api_key_auth()
                        .build(),
                ),
            )
            .expect(1)
            .mount(&server)
            .await;

        let registry = AgentRegistry::new(reqwest::Client::new(), Duration::from_secs(300));
        let base = format!("{}/", server.uri());
        let card = registry.discover(&base).await.unwrap();
        assert_eq!(card.name, "remote");

        // Second lookup is served from cache, trailing slash or not.
        let cached = registry.get_or_discover(&server.uri()).await.unwrap();
        assert_eq!(cached.name, "remote");
    }

    #[tokio::test]
    async fn discover_non_success_is_discovery_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let registry = AgentRegistry::new(reqwest::Client::new(), Duration::from_secs(60));
        let err = registry.discover(&server.uri()).await.unwrap_err();
        assert!(matches!(err, A2aError::Discovery { .. }));
    }

    #[tokio::test]
    async fn discover_garbage_body_is_discovery_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let registry = AgentRegistry::new(reqwest::Client::new(), Duration::from_secs(60));
        let err = registry.discover(&server.uri()).await.unwrap_err();
        assert!(matches!(err, A2aError::Discovery { .. }));
    }

    #[tokio::test]
    async fn get_or_discover_returns_registered() {
        let registry = AgentRegistry::new(reqwest::Client::new(), Duration::from_secs(300));
        registry
            .register("http://example.com", test_card("cached"))
            .await;

        let card = registry.get_or_discover("http://example.com").await.unwrap();
        assert_eq!(card.name, "cached");
    }

    #[tokio::test]
    async fn inserts_evict_stale_entries() {
        let registry = AgentRegistry::new(reqwest::Client::new(), Duration::from_millis(20));
        registry
            .register("http://stale.example.com", test_card("stale"))
            .await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        registry
            .register("http://fresh.example.com", test_card("fresh"))
            .await;

        let cache = registry.cache.read().await;
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("http://fresh.example.com"));
    }

    #[tokio::test]
    async fn stale_entry_is_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(WELL_KNOWN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_card("refetched")))
            .expect(1)
            .mount(&server)
            .await;

        let registry = AgentRegistry::new(reqwest::Client::new(), Duration::from_millis(20));
        registry.register(&server.uri(), test_card("old")).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let card = registry.get_or_discover(&server.uri()).await.unwrap();
        assert_eq!(card.name, "refetched");
    }

    #[tokio::test]
    async fn register_overwrites_existing() {
        let registry = AgentRegistry::new(reqwest::Client::new(), Duration::from_secs(300));
        registry.register("http://a.example.com", test_card("v1")).await;
        registry.register("http://a.example.com/", test_card("v2")).await;

        let card = registry.get_or_discover("http://a.example.com").await.unwrap();
        assert_eq!(card.name, "v2");
        assert_eq!(registry.cache.read().await.len(), 1);
    }
}
