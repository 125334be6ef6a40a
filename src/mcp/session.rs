// MCP client sessions backed by rmcp

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use rmcp::model::{CallToolRequestParam, CallToolResult, ClientRequest, JsonObject, Tool as McpTool};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::ServiceExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::TokenCache;
use crate::error::GatewayError;
use crate::mcp::EndpointConfig;

/// One live connection to one endpoint.
///
/// Implementations must tolerate concurrent calls; the connection manager
/// hands the same session to every caller until it fails a liveness probe.
pub trait Session: Send + Sync {
    /// List every tool the endpoint currently advertises.
    fn list_tools(&self) -> Pin<Box<dyn Future<Output = Result<Vec<McpTool>>> + Send + '_>>;

    /// Invoke a tool by its native name.
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: JsonObject,
    ) -> Pin<Box<dyn Future<Output = Result<CallToolResult>> + Send + 'a>>;

    /// Lightweight round-trip confirming the session is still usable.
    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Close the session. Closing twice yields `GatewayError::SessionClosed`.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Opens sessions for endpoint descriptors.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        endpoint: &'a EndpointConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Session>>> + Send + 'a>>;
}

/// Wrapper for a running rmcp client.
///
/// Calls go through a cloned `Peer` so that closing (which consumes the
/// `RunningService`) never waits on in-flight requests.
pub struct RmcpSession {
    endpoint: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl RmcpSession {
    pub fn new(endpoint: impl Into<String>, service: RunningService<RoleClient, ()>) -> Self {
        let peer = service.peer().clone();
        Self {
            endpoint: endpoint.into(),
            peer,
            service: Mutex::new(Some(service)),
        }
    }
}

impl Session for RmcpSession {
    fn list_tools(&self) -> Pin<Box<dyn Future<Output = Result<Vec<McpTool>>> + Send + '_>> {
        Box::pin(async move {
            let tools = self.peer.list_all_tools().await?;
            if tools.is_empty() {
                warn!("MCP endpoint `{}` reported no tools", self.endpoint);
            }
            Ok(tools)
        })
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: JsonObject,
    ) -> Pin<Box<dyn Future<Output = Result<CallToolResult>> + Send + 'a>> {
        Box::pin(async move {
            let request = CallToolRequestParam {
                name: Cow::from(name.to_string()),
                arguments: Some(arguments),
                meta: None,
                task: None,
            };

            Ok(self.peer.call_tool(request).await?)
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.peer
                .send_request(ClientRequest::PingRequest(Default::default()))
                .await?;
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let service = self.service.lock().await.take();
            let Some(service) = service else {
                return Err(GatewayError::SessionClosed(self.endpoint.clone()).into());
            };

            service.cancel().await?;
            debug!("MCP session for `{}` closed", self.endpoint);
            Ok(())
        })
    }
}

/// Connects to endpoints over rmcp's streamable HTTP client transport.
///
/// When a token cache is attached, every connect (including reconnects)
/// carries `Authorization: Bearer <token>`.
#[derive(Default)]
pub struct StreamableHttpConnector {
    tokens: Option<Arc<TokenCache>>,
}

impl StreamableHttpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_cache(tokens: Arc<TokenCache>) -> Self {
        Self {
            tokens: Some(tokens),
        }
    }

    /// Headers for a new connection: the configured ones plus the bearer
    /// token, if one can be obtained.
    async fn request_headers(&self, endpoint: &EndpointConfig) -> BTreeMap<String, String> {
        let mut headers = endpoint.headers.clone();

        if let Some(tokens) = &self.tokens {
            match tokens.get_token().await {
                Ok(token) => {
                    headers.retain(|name, _| !name.eq_ignore_ascii_case("authorization"));
                    headers.insert("Authorization".to_string(), format!("Bearer {}", token));
                }
                Err(e) => {
                    warn!(
                        "Failed to fetch OAuth token for `{}`, connecting without it: {}",
                        endpoint.name, e
                    );
                }
            }
        }

        headers
    }
}

impl Connector for StreamableHttpConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a EndpointConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Session>>> + Send + 'a>> {
        Box::pin(async move {
            info!(
                "Connecting to MCP endpoint `{}` at `{}` via rmcp streamable HTTP",
                endpoint.name, endpoint.url
            );

            let headers = self.request_headers(endpoint).await;
            // No request timeout: the channel carries long-lived streamed responses.
            let http = crate::http::build_client(&headers, endpoint.tls_skip_verify, None)?;

            let transport = StreamableHttpClientTransport::with_client(
                http,
                StreamableHttpClientTransportConfig::with_uri(endpoint.url.as_str()),
            );
            let client = ().serve(transport).await?;

            Ok(Arc::new(RmcpSession::new(endpoint.name.clone(), client)) as Arc<dyn Session>)
        })
    }
}
