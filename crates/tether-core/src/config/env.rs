use std::path::PathBuf;

use super::{Config, ServerAuthScheme};

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_server();
        self.apply_env_overrides_client();
    }

    fn apply_env_overrides_server(&mut self) {
        if let Ok(v) = std::env::var("TETHER_SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("TETHER_SERVER_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.server.port = port;
        }
        if let Ok(v) = std::env::var("TETHER_SERVER_PUBLIC_URL") {
            self.server.public_url = v;
        }
        if let Ok(v) = std::env::var("TETHER_SERVER_MAX_BODY_SIZE")
            && let Ok(size) = v.parse::<usize>()
        {
            self.server.max_body_size = size;
        }
        if let Ok(v) = std::env::var("TETHER_SERVER_AUTH_SCHEME") {
            match v.as_str() {
                "none" => self.server.auth_scheme = ServerAuthScheme::None,
                "api_key" => self.server.auth_scheme = ServerAuthScheme::ApiKey,
                "bearer" => self.server.auth_scheme = ServerAuthScheme::Bearer,
                other => tracing::warn!("ignoring invalid TETHER_SERVER_AUTH_SCHEME value: {other}"),
            }
        }
        if let Ok(v) = std::env::var("TETHER_SERVER_AUTH_TOKEN") {
            self.server.auth_token = Some(v);
        }
        if let Ok(v) = std::env::var("TETHER_AGENT_NAME") {
            self.agent.name = v;
        }
    }

    fn apply_env_overrides_client(&mut self) {
        if let Ok(v) = std::env::var("TETHER_CLIENT_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.client.timeout = secs;
        }
        if let Ok(v) = std::env::var("TETHER_CLIENT_MAX_RETRIES")
            && let Ok(n) = v.parse::<u32>()
        {
            self.client.max_retries = n;
        }
        if let Ok(v) = std::env::var("TETHER_CREDENTIALS_FILE") {
            self.credentials.file = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("TETHER_CREDENTIALS_KEYRING")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.credentials.keyring = enabled;
        }
    }
}
