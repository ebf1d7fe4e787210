mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error describing the first inconsistent setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.name.trim().is_empty() {
            bail!("agent.name must not be empty");
        }
        if self.server.max_body_size == 0 {
            bail!("server.max_body_size must be greater than zero");
        }
        if self.server.auth_scheme != ServerAuthScheme::None
            && self.server.auth_token.as_deref().is_none_or(str::is_empty)
        {
            bail!("server.auth_token is required when server.auth_scheme is set");
        }
        if self.server.auth_scheme == ServerAuthScheme::Bearer && self.server.token_url.is_none() {
            bail!("server.token_url is required when server.auth_scheme = \"bearer\"");
        }
        if !self.server.public_url.is_empty() {
            url::Url::parse(&self.server.public_url).context("server.public_url is not a valid URL")?;
        }
        if self.client.timeout == 0 {
            bail!("client.timeout must be greater than zero");
        }
        if self.credentials.env_prefix.trim().is_empty() {
            bail!("credentials.env_prefix must not be empty");
        }
        Ok(())
    }
}
