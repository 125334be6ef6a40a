// Connection manager: one live session per endpoint, reconnected lazily

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Timeouts;
use crate::error::GatewayError;
use crate::mcp::{Connector, EndpointConfig, EndpointRegistry, OperationDescriptor, Session};

/// Outcome of the startup connection sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InitializeSummary {
    pub connected: Vec<String>,
    /// Endpoint name and the reason it could not be reached.
    pub failed: Vec<(String, String)>,
}

/// Owns the session table.
///
/// Readers only ever hold the table lock long enough to clone an `Arc`;
/// probes, connects and closes all happen outside it. Reconnects for the
/// same endpoint are serialized through a per-endpoint gate so that a burst
/// of callers on a dead session produces exactly one new connection.
pub struct ConnectionManager {
    registry: Arc<EndpointRegistry>,
    connector: Arc<dyn Connector>,
    sessions: RwLock<HashMap<String, Arc<dyn Session>>>,
    reconnect_gates: HashMap<String, Mutex<()>>,
    timeouts: Timeouts,
}

impl ConnectionManager {
    pub fn new(
        registry: EndpointRegistry,
        connector: Arc<dyn Connector>,
        timeouts: Timeouts,
    ) -> Self {
        let reconnect_gates = registry
            .names()
            .map(|name| (name.to_string(), Mutex::new(())))
            .collect();

        Self {
            registry: Arc::new(registry),
            connector,
            sessions: RwLock::new(HashMap::new()),
            reconnect_gates,
            timeouts,
        }
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Names of endpoints that currently have a session in the table.
    pub async fn connected_endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Connect to every registered endpoint concurrently.
    ///
    /// An endpoint only enters the table once its tool listing succeeds.
    /// Failures are logged and reported; they never abort the sweep.
    pub async fn initialize(&self) -> InitializeSummary {
        let mut tasks = JoinSet::new();
        for endpoint in self.registry.iter() {
            let endpoint = endpoint.clone();
            let connector = self.connector.clone();
            let timeouts = self.timeouts;
            tasks.spawn(async move {
                let outcome = connect_and_verify(connector.as_ref(), &endpoint, &timeouts).await;
                (endpoint.name.clone(), outcome)
            });
        }

        let mut summary = InitializeSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let (name, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("MCP connection task failed: {}", e);
                    continue;
                }
            };

            match outcome {
                Ok((session, tool_count)) => {
                    info!("MCP connected to `{}` ({} tools)", name, tool_count);
                    let previous = self.sessions.write().await.insert(name.clone(), session);
                    if let Some(previous) = previous {
                        close_quietly(&name, previous, self.timeouts.probe).await;
                    }
                    summary.connected.push(name);
                }
                Err(e) => {
                    warn!("Failed to connect MCP endpoint `{}`: {:#}", name, e);
                    summary.failed.push((name, format!("{:#}", e)));
                }
            }
        }

        summary.connected.sort();
        summary.failed.sort();
        summary
    }

    /// A session for `endpoint` that answered a liveness probe.
    ///
    /// Dead or missing sessions are replaced by a fresh connection; the
    /// replaced session is closed.
    pub async fn get_session(&self, endpoint: &str) -> Result<Arc<dyn Session>, GatewayError> {
        let Some(config) = self.registry.get(endpoint) else {
            return Err(GatewayError::NotConfigured(endpoint.to_string()));
        };

        let current = self.sessions.read().await.get(endpoint).cloned();
        if let Some(session) = &current
            && self.probe(endpoint, session.as_ref()).await
        {
            return Ok(session.clone());
        }

        let Some(gate) = self.reconnect_gates.get(endpoint) else {
            return Err(GatewayError::NotConfigured(endpoint.to_string()));
        };
        let _guard = gate.lock().await;

        // Another caller may have reconnected while we waited on the gate.
        let latest = self.sessions.read().await.get(endpoint).cloned();
        if let Some(latest) = latest
            && current.as_ref().is_none_or(|stale| !Arc::ptr_eq(stale, &latest))
        {
            return Ok(latest);
        }

        let fresh = self.reconnect(config).await?;

        let stale = self
            .sessions
            .write()
            .await
            .insert(endpoint.to_string(), fresh.clone());
        if let Some(stale) = stale {
            close_quietly(endpoint, stale, self.timeouts.probe).await;
        }

        info!("MCP reconnected to `{}`", endpoint);
        Ok(fresh)
    }

    /// Every operation advertised by the currently connected endpoints.
    ///
    /// Ordered by endpoint name, then by each endpoint's listing order.
    /// An endpoint whose listing fails is skipped.
    pub async fn list_operations(&self) -> Vec<OperationDescriptor> {
        let snapshot: Vec<(String, Arc<dyn Session>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(name, session)| (name.clone(), session.clone()))
            .collect();

        let mut tasks = JoinSet::new();
        for (name, session) in snapshot {
            let deadline = self.timeouts.call;
            tasks.spawn(async move {
                let listed = within(deadline, &name, "list tools", session.list_tools()).await;
                (name, listed)
            });
        }

        let mut by_endpoint = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(tools))) => {
                    let operations: Vec<OperationDescriptor> = tools
                        .iter()
                        .map(|tool| OperationDescriptor::from_tool(&name, tool))
                        .collect();
                    by_endpoint.insert(name, operations);
                }
                Ok((name, Err(e))) => {
                    warn!("Failed to list tools from MCP endpoint `{}`: {:#}", name, e);
                }
                Err(e) => warn!("MCP listing task failed: {}", e),
            }
        }

        by_endpoint.into_values().flatten().collect()
    }

    /// Close every session and empty the table.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<dyn Session>)> =
            self.sessions.write().await.drain().collect();

        for (name, session) in drained {
            close_quietly(&name, session, self.timeouts.probe).await;
        }
        info!("MCP connection manager shut down");
    }

    async fn probe(&self, endpoint: &str, session: &dyn Session) -> bool {
        match within(self.timeouts.probe, endpoint, "liveness probe", session.ping()).await {
            Ok(()) => true,
            Err(e) => {
                debug!("MCP session for `{}` failed liveness probe: {:#}", endpoint, e);
                false
            }
        }
    }

    async fn reconnect(&self, config: &EndpointConfig) -> Result<Arc<dyn Session>, GatewayError> {
        debug!("Reconnecting to MCP endpoint `{}`", config.name);
        within(
            self.timeouts.connect,
            &config.name,
            "connect",
            self.connector.connect(config),
        )
        .await
        .map_err(|source| GatewayError::Reconnect {
            endpoint: config.name.clone(),
            source,
        })
    }
}

/// Connect, then confirm the endpoint answers a tool listing.
async fn connect_and_verify(
    connector: &dyn Connector,
    endpoint: &EndpointConfig,
    timeouts: &Timeouts,
) -> Result<(Arc<dyn Session>, usize)> {
    let session = within(
        timeouts.connect,
        &endpoint.name,
        "connect",
        connector.connect(endpoint),
    )
    .await?;

    match within(timeouts.call, &endpoint.name, "list tools", session.list_tools()).await {
        Ok(tools) => Ok((session, tools.len())),
        Err(e) => {
            close_quietly(&endpoint.name, session, timeouts.probe).await;
            Err(e)
        }
    }
}

/// Run `fut` under `deadline`, mapping expiry to `GatewayError::Timeout`.
async fn within<T>(
    deadline: Duration,
    endpoint: &str,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            endpoint: endpoint.to_string(),
            operation: operation.to_string(),
            after: deadline,
        }
        .into()),
    }
}

/// Close a session, logging anything other than the expected disconnect noise.
async fn close_quietly(endpoint: &str, session: Arc<dyn Session>, deadline: Duration) {
    match within(deadline, endpoint, "close", session.close()).await {
        Ok(()) => debug!("Closed MCP session for `{}`", endpoint),
        Err(e) if is_expected_close_error(&e) => {
            debug!("MCP session for `{}` already gone: {:#}", endpoint, e)
        }
        Err(e) => warn!("Error closing MCP session for `{}`: {:#}", endpoint, e),
    }
}

fn is_expected_close_error(err: &anyhow::Error) -> bool {
    use std::io::ErrorKind;

    err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<GatewayError>() {
            return e.is_disconnect();
        }
        if let Some(e) = cause.downcast_ref::<tokio::task::JoinError>() {
            return e.is_cancelled();
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
            );
        }
        false
    })
}
