//! Gateway facade: aggregated listing and invocation by qualified name.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info};

use crate::auth::TokenCache;
use crate::config::{GatewayConfig, Timeouts};
use crate::error::GatewayError;
use crate::mcp::{
    AllowList, ConnectionManager, Connector, EndpointRegistry, InitializeSummary,
    OperationDescriptor, OperationProxy, StreamableHttpConnector, ToolOutput, TransformRegistry,
    split_qualified_name,
};

/// Entry point for callers: lists allowed operations and invokes them.
#[derive(Clone)]
pub struct Gateway {
    manager: Arc<ConnectionManager>,
    allow_list: Arc<AllowList>,
    transforms: Arc<TransformRegistry>,
}

impl Gateway {
    /// Build a gateway that talks streamable HTTP to the configured endpoints.
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let connector = match &config.oauth {
            Some(oauth) => {
                let tokens = TokenCache::client_credentials(oauth, config.tls_skip_verify)?;
                info!("OAuth client credentials configured for `{}`", oauth.token_url);
                StreamableHttpConnector::with_token_cache(Arc::new(tokens))
            }
            None => StreamableHttpConnector::new(),
        };

        let registry = EndpointRegistry::new(config.endpoints)?;
        Ok(Self::with_connector(registry, Arc::new(connector), config.timeouts))
    }

    pub fn with_connector(
        registry: EndpointRegistry,
        connector: Arc<dyn Connector>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            manager: Arc::new(ConnectionManager::new(registry, connector, timeouts)),
            allow_list: Arc::new(AllowList::default()),
            transforms: Arc::new(TransformRegistry::default()),
        }
    }

    pub fn with_allow_list(mut self, allow_list: AllowList) -> Self {
        self.allow_list = Arc::new(allow_list);
        self
    }

    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = Arc::new(transforms);
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub async fn initialize(&self) -> InitializeSummary {
        let summary = self.manager.initialize().await;
        info!(
            "Gateway initialized: {} endpoint(s) connected, {} failed",
            summary.connected.len(),
            summary.failed.len()
        );
        summary
    }

    /// Allowed operations across every reachable endpoint.
    pub async fn list_operations(&self) -> Vec<OperationDescriptor> {
        self.allow_list.filter(self.manager.list_operations().await)
    }

    /// Proxies for every allowed operation.
    pub async fn operations(&self) -> Vec<OperationProxy> {
        self.list_operations()
            .await
            .into_iter()
            .map(|descriptor| self.proxy(descriptor))
            .collect()
    }

    /// Invoke an operation by qualified name with JSON-encoded arguments.
    pub async fn invoke(&self, qualified_name: &str, arguments: &str) -> ToolOutput {
        let Some((endpoint, operation)) =
            split_qualified_name(qualified_name, self.manager.registry())
        else {
            return ToolOutput::error(GatewayError::NotConfigured(qualified_name.to_string()).to_string());
        };

        if !self.allow_list.is_allowed(operation) {
            return ToolOutput::error(format!("operation '{}' is not allowed", operation));
        }

        let deadline = self.manager.timeouts().call;
        let started = Instant::now();
        let lookup = self.describe(endpoint, operation);
        let descriptor = match tokio::time::timeout(deadline, lookup).await {
            Ok(Ok(descriptor)) => descriptor,
            Ok(Err(e)) => return ToolOutput::error(e.to_string()),
            Err(_) => {
                let err = GatewayError::Timeout {
                    endpoint: endpoint.to_string(),
                    operation: operation.to_string(),
                    after: deadline,
                };
                return ToolOutput::error(err.to_string());
            }
        };

        let remaining = deadline.saturating_sub(started.elapsed());
        self.proxy(descriptor).invoke_within(arguments, remaining).await
    }

    /// Descriptor for `operation` as advertised by its own endpoint.
    ///
    /// Only the owning endpoint is asked. If it cannot list its tools the
    /// call still goes ahead without schema checks.
    async fn describe(&self, endpoint: &str, operation: &str) -> Result<OperationDescriptor> {
        let session = self.manager.get_session(endpoint).await?;
        match session.list_tools().await {
            Ok(tools) => Ok(tools
                .iter()
                .find(|tool| tool.name == operation)
                .map(|tool| OperationDescriptor::from_tool(endpoint, tool))
                .unwrap_or_else(|| OperationDescriptor::unlisted(endpoint, operation))),
            Err(e) => {
                debug!("Failed to list tools on `{}`: {}", endpoint, e);
                Ok(OperationDescriptor::unlisted(endpoint, operation))
            }
        }
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    fn proxy(&self, descriptor: OperationDescriptor) -> OperationProxy {
        OperationProxy::new(descriptor, self.manager.clone(), self.transforms.clone())
    }
}
