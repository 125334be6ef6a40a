//! MCP server implementation using rmcp.
//!
//! Re-exposes the gateway's allowed operations, under their qualified
//! names, to a downstream MCP client over stdio.

use std::future::Future;

use anyhow::Result;
use rmcp::{
    ErrorData as McpError, ServiceExt,
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
};
use serde_json::Value;
use tracing::{debug, info};

use crate::gateway::Gateway;

/// MCP server that delegates every tool call to the gateway.
#[derive(Clone)]
pub struct GatewayServer {
    gateway: Gateway,
}

impl GatewayServer {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

impl ServerHandler for GatewayServer {
    fn ping(
        &self,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Ok(()))
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            let tools = self
                .gateway
                .list_operations()
                .await
                .iter()
                .map(|op| op.to_mcp_tool())
                .collect();

            Ok(ListToolsResult {
                tools,
                next_cursor: None,
                ..Default::default()
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_name = request.name.to_string();
        let args = Value::Object(request.arguments.unwrap_or_default()).to_string();

        async move {
            debug!("Gateway call `{}`", tool_name);
            let output = self.gateway.invoke(&tool_name, &args).await;
            Ok(output.into_call_tool_result())
        }
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Gateway to remote MCP endpoints. Tools are named \
                 mcp_<endpoint>_<tool> and are routed to the named endpoint."
                    .to_string(),
            ),
        }
    }
}

/// Serve the gateway as an MCP server over stdio until the client disconnects.
pub async fn serve_stdio(gateway: Gateway) -> Result<()> {
    info!("Starting MCP gateway on stdio");
    let server = GatewayServer::new(gateway);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::mcp::testing::{FakeConnector, tool};
    use crate::mcp::{EndpointConfig, EndpointRegistry};
    use std::borrow::Cow;

    #[tokio::test]
    async fn test_server_lists_and_calls_qualified_tools() {
        let connector = FakeConnector::new();
        let observer = connector.add(
            "observer",
            vec![tool("list_projects", &[]), tool("restart_cluster", &[])],
        );
        observer.respond_text("list_projects", "[\"alpha\"]");

        let registry =
            EndpointRegistry::new(vec![EndpointConfig::new("observer", "http://observer/mcp")])
                .unwrap();
        let gateway = Gateway::with_connector(registry, connector, Timeouts::default());
        gateway.initialize().await;

        let (client_stream, server_stream) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_stream);
        let (client_read, client_write) = tokio::io::split(client_stream);

        let server_handle = tokio::spawn(async move {
            GatewayServer::new(gateway)
                .serve((server_read, server_write))
                .await
                .unwrap()
        });
        let client = ().serve((client_read, client_write)).await.unwrap();
        let server = server_handle.await.unwrap();

        let tools = client.list_all_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| &*t.name).collect();
        assert_eq!(names, vec!["mcp_observer_list_projects"]);

        let result = client
            .call_tool(CallToolRequestParam {
                name: Cow::from("mcp_observer_list_projects"),
                arguments: None,
                meta: None,
                task: None,
            })
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(false));
        assert_eq!(crate::mcp::content_text(&result), "[\"alpha\"]");

        let result = client
            .call_tool(CallToolRequestParam {
                name: Cow::from("mcp_observer_restart_cluster"),
                arguments: None,
                meta: None,
                task: None,
            })
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));

        client.cancel().await.unwrap();
        server.cancel().await.unwrap();
    }
}
