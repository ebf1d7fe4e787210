//! Shared HTTP client construction for consistent timeout and TLS configuration.

use std::time::Duration;

use anyhow::Context;

/// HTTP client with standard tether configuration.
///
/// Config: connect timeout as given, rustls TLS, `tether/{version}`
/// user-agent, redirect limit 10. There is no overall request timeout because
/// the same client carries long-lived event streams; unary calls set their own.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn default_client(connect_timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .context("failed to build HTTP client")
}
