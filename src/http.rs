//! Shared `reqwest` client construction.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

const USER_AGENT: &str = concat!("mcp-gateway/", env!("CARGO_PKG_VERSION"));

/// Build an HTTP client that attaches `headers` to every request.
///
/// `timeout` bounds whole requests; leave it `None` for clients that carry
/// long-lived streaming responses, which only get a connect timeout.
pub fn build_client(
    headers: &BTreeMap<String, String>,
    tls_skip_verify: bool,
    timeout: Option<Duration>,
) -> Result<Client> {
    let mut default_headers = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name `{}`", name))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header `{}`", name))?;
        default_headers.insert(name, value);
    }

    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(default_headers)
        .connect_timeout(Duration::from_secs(10));

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if tls_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().context("failed to build HTTP client")
}
