//! In-process fakes for the `Connector` / `Session` seams.

#![cfg(test)]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool as McpTool};
use serde_json::json;

use crate::error::GatewayError;
use crate::mcp::{Connector, EndpointConfig, Session};

/// Build a tool with the given required parameters.
pub(crate) fn tool(name: &str, required: &[&str]) -> McpTool {
    let mut properties = serde_json::Map::new();
    for param in required {
        properties.insert(param.to_string(), json!({ "type": "string" }));
    }

    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), json!(properties));
    schema.insert("required".to_string(), json!(required));

    McpTool::new(name.to_string(), format!("{} description", name), schema)
}

/// Scripted behavior of one fake endpoint, shared by all its sessions.
#[derive(Default)]
pub(crate) struct FakeEndpoint {
    tools: Mutex<Vec<McpTool>>,
    responses: Mutex<HashMap<String, CallToolResult>>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    connects: AtomicUsize,
    calls: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_list: AtomicBool,
    pub hang_list: AtomicBool,
    pub hang_ping: AtomicBool,
    connect_delay: Mutex<Duration>,
}

impl FakeEndpoint {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn respond(&self, tool: &str, result: CallToolResult) {
        self.responses.lock().unwrap().insert(tool.to_string(), result);
    }

    pub fn respond_text(&self, tool: &str, text: &str) {
        self.respond(tool, CallToolResult::success(vec![Content::text(text.to_string())]));
    }

    pub fn latest_session(&self) -> Option<Arc<FakeSession>> {
        self.sessions.lock().unwrap().last().cloned()
    }
}

pub(crate) struct FakeSession {
    endpoint: String,
    behavior: Arc<FakeEndpoint>,
    alive: AtomicBool,
    closed: AtomicBool,
}

impl FakeSession {
    /// Simulate the remote side dropping the connection.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("connection to `{}` terminated", self.endpoint))
        }
    }
}

impl Session for FakeSession {
    fn list_tools(&self) -> Pin<Box<dyn Future<Output = Result<Vec<McpTool>>> + Send + '_>> {
        Box::pin(async move {
            if self.behavior.hang_list.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.check_alive()?;
            if self.behavior.fail_list.load(Ordering::SeqCst) {
                return Err(anyhow!("method not found: tools/list"));
            }
            Ok(self.behavior.tools.lock().unwrap().clone())
        })
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: JsonObject,
    ) -> Pin<Box<dyn Future<Output = Result<CallToolResult>> + Send + 'a>> {
        Box::pin(async move {
            self.check_alive()?;
            self.behavior.calls.fetch_add(1, Ordering::SeqCst);

            let scripted = self.behavior.responses.lock().unwrap().get(name).cloned();
            Ok(scripted.unwrap_or_else(|| {
                CallToolResult::success(vec![Content::text(format!(
                    "{} called with {}",
                    name,
                    serde_json::Value::Object(arguments)
                ))])
            }))
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.behavior.hang_ping.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.check_alive()
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.alive.store(false, Ordering::SeqCst);
            if self.closed.swap(true, Ordering::SeqCst) {
                return Err(GatewayError::SessionClosed(self.endpoint.clone()).into());
            }
            Ok(())
        })
    }
}

/// Connector handing out `FakeSession`s for registered endpoint names.
#[derive(Default)]
pub(crate) struct FakeConnector {
    endpoints: Mutex<HashMap<String, Arc<FakeEndpoint>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, name: &str, tools: Vec<McpTool>) -> Arc<FakeEndpoint> {
        let behavior = Arc::new(FakeEndpoint::default());
        *behavior.tools.lock().unwrap() = tools;
        self.endpoints
            .lock()
            .unwrap()
            .insert(name.to_string(), behavior.clone());
        behavior
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a EndpointConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Session>>> + Send + 'a>> {
        Box::pin(async move {
            let behavior = self
                .endpoints
                .lock()
                .unwrap()
                .get(&endpoint.name)
                .cloned()
                .ok_or_else(|| anyhow!("no route to {}", endpoint.url))?;

            behavior.connects.fetch_add(1, Ordering::SeqCst);
            let delay = *behavior.connect_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if behavior.fail_connect.load(Ordering::SeqCst) {
                return Err(anyhow!("connection refused"));
            }

            let session = Arc::new(FakeSession {
                endpoint: endpoint.name.clone(),
                behavior: behavior.clone(),
                alive: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            });
            behavior.sessions.lock().unwrap().push(session.clone());

            Ok(session as Arc<dyn Session>)
        })
    }
}
