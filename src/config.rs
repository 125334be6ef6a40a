use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::Path, path::PathBuf, time::Duration};

use crate::mcp::EndpointConfig;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayJsonConfig {
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    #[serde(default)]
    pub tls_skip_verify: bool,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpServerConfig {
    // only present on stdio servers, which the gateway refuses
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Default deadlines for remote-facing calls, in seconds.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub probe_secs: u64,
    pub call_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            probe_secs: 5,
            call_secs: 120,
        }
    }
}

/// Resolved deadlines handed to the connection manager and proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub probe: Duration,
    pub call: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        TimeoutConfig::default().into()
    }
}

impl From<TimeoutConfig> for Timeouts {
    fn from(cfg: TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_secs(cfg.connect_secs),
            probe: Duration::from_secs(cfg.probe_secs),
            call: Duration::from_secs(cfg.call_secs),
        }
    }
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub tls_skip_verify: bool,
    pub oauth: Option<OAuthConfig>,
    pub timeouts: Timeouts,
}

impl GatewayConfig {
    pub fn from_json(cfg: GatewayJsonConfig) -> anyhow::Result<Self> {
        let mut endpoints = Vec::new();
        for (name, server_cfg) in cfg.mcp_servers {
            if server_cfg.disabled {
                tracing::info!("Skipping disabled MCP endpoint `{name}`");
                continue;
            }
            let expanded = expand_server(server_cfg);
            endpoints.push(endpoint_from_json(name, expanded, cfg.tls_skip_verify)?);
        }

        Ok(Self {
            endpoints,
            tls_skip_verify: cfg.tls_skip_verify,
            oauth: cfg.oauth,
            timeouts: cfg.timeouts.into(),
        })
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Could not read {}: {}", path.display(), e))?;
        let cfg: GatewayJsonConfig = serde_json::from_str(&raw)?;
        Self::from_json(cfg)
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&resolve_config_path()?)
    }

    /// Apply the gateway-wide TLS policy to every endpoint.
    pub fn set_tls_skip_verify(&mut self, skip: bool) {
        self.tls_skip_verify = skip;
        for endpoint in &mut self.endpoints {
            endpoint.tls_skip_verify = skip;
        }
    }
}

fn endpoint_from_json(
    name: String,
    cfg: McpServerConfig,
    tls_skip_verify: bool,
) -> anyhow::Result<EndpointConfig> {
    if let Some(url) = cfg.url {
        return Ok(EndpointConfig {
            name,
            url,
            headers: cfg.headers,
            tls_skip_verify,
        });
    }

    if cfg.command.is_some() {
        return Err(anyhow::anyhow!(
            "Server `{}` is a stdio server; only streamable HTTP (`url`) endpoints are supported",
            name
        ));
    }

    Err(anyhow::anyhow!("Server `{}` must have a `url`", name))
}

pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(p) = env::var("MCP_GATEWAY_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("mcp-gateway").join("gateway.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from("gateway.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find gateway.json (set MCP_GATEWAY_CONFIG or create ./gateway.json)"
    ))
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            match env::var(&name) {
                Ok(val) => out.push_str(&val),
                Err(_) => {
                    out.push_str("${");
                    out.push_str(&name);
                    out.push('}');
                }
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_server(mut cfg: McpServerConfig) -> McpServerConfig {
    for val in cfg.headers.values_mut() {
        *val = expand_env_vars(val);
    }
    if let Some(url) = cfg.url.as_mut() {
        *url = expand_env_vars(url);
    }

    cfg
}
