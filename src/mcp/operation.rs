//! Operation descriptors and the per-operation invocation proxy.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{CallToolResult, Content, JsonObject, Tool as McpTool};
use serde_json::Value;
use tracing::debug;

use crate::error::GatewayError;
use crate::mcp::{ConnectionManager, EndpointRegistry, TransformRegistry};

/// Prefix shared by every qualified operation name.
pub const QUALIFIED_PREFIX: &str = "mcp_";

/// Qualified name of `operation` on `endpoint`, e.g. `mcp_observer_get_traces`.
pub fn qualified_name(endpoint: &str, operation: &str) -> String {
    format!("{}{}_{}", QUALIFIED_PREFIX, endpoint, operation)
}

/// Split a qualified name into `(endpoint, operation)`.
///
/// Endpoint names may themselves contain underscores, so the longest
/// registered endpoint name that matches wins.
pub fn split_qualified_name<'q>(
    qualified: &'q str,
    registry: &EndpointRegistry,
) -> Option<(&'q str, &'q str)> {
    let rest = qualified.strip_prefix(QUALIFIED_PREFIX)?;

    registry
        .names()
        .filter_map(|name| {
            rest.strip_prefix(name)
                .and_then(|tail| tail.strip_prefix('_'))
                .filter(|operation| !operation.is_empty())
                .map(|operation| (name.len(), operation))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(len, operation)| (&rest[..len], operation))
}

/// Metadata describing one invocable remote operation.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub qualified_name: String,
    pub endpoint: String,
    /// Native operation name on the endpoint.
    pub name: String,
    pub description: String,
    /// The `properties` of the input schema.
    pub parameters: JsonObject,
    pub required: Vec<String>,
    pub input_schema: Arc<JsonObject>,
}

impl OperationDescriptor {
    pub fn from_tool(endpoint: &str, tool: &McpTool) -> Self {
        let parameters = tool
            .input_schema
            .get("properties")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let required = tool
            .input_schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            qualified_name: qualified_name(endpoint, &tool.name),
            endpoint: endpoint.to_string(),
            name: tool.name.to_string(),
            description: tool.description.as_deref().unwrap_or_default().to_string(),
            parameters,
            required,
            input_schema: tool.input_schema.clone(),
        }
    }

    /// Descriptor for an operation known only by name, with no schema.
    pub fn unlisted(endpoint: &str, name: &str) -> Self {
        Self {
            qualified_name: qualified_name(endpoint, name),
            endpoint: endpoint.to_string(),
            name: name.to_string(),
            description: String::new(),
            parameters: JsonObject::new(),
            required: Vec::new(),
            input_schema: Arc::new(JsonObject::new()),
        }
    }

    /// Present this operation under its qualified name.
    pub fn to_mcp_tool(&self) -> McpTool {
        McpTool::new(
            self.qualified_name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        )
    }
}

/// Text result of an invocation. Failures are values, not faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    pub fn into_call_tool_result(self) -> CallToolResult {
        CallToolResult {
            content: vec![Content::text(self.text)],
            structured_content: None,
            is_error: Some(self.is_error),
            meta: None,
        }
    }
}

/// Parse caller-supplied JSON arguments and check required parameters.
pub fn parse_arguments(raw: &str, required: &[String]) -> Result<JsonObject, String> {
    let trimmed = raw.trim();
    let args = if trimmed.is_empty() {
        JsonObject::new()
    } else {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Null) => JsonObject::new(),
            Ok(other) => {
                return Err(format!(
                    "error parsing parameters: expected a JSON object, got {}",
                    json_kind(&other)
                ));
            }
            Err(e) => return Err(format!("error parsing parameters: {}", e)),
        }
    };

    let missing: Vec<&str> = required
        .iter()
        .filter(|name| !args.contains_key(name.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing required parameter(s): {}", missing.join(", ")));
    }

    Ok(args)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Join the textual segments of a tool result, one per line.
///
/// Non-text segments are rendered as their JSON form.
pub fn content_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .map(|content| match content.as_text() {
            Some(text) => text.text.clone(),
            None => serde_json::to_string(content).unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Invocation adapter for one operation.
///
/// Each call asks the connection manager for a live session, so a proxy
/// survives any number of reconnects of its endpoint.
#[derive(Clone)]
pub struct OperationProxy {
    descriptor: OperationDescriptor,
    manager: Arc<ConnectionManager>,
    transforms: Arc<TransformRegistry>,
}

impl OperationProxy {
    pub fn new(
        descriptor: OperationDescriptor,
        manager: Arc<ConnectionManager>,
        transforms: Arc<TransformRegistry>,
    ) -> Self {
        Self {
            descriptor,
            manager,
            transforms,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.qualified_name
    }

    /// Invoke under the manager's default call deadline.
    pub async fn invoke(&self, arguments: &str) -> ToolOutput {
        let deadline = self.manager.timeouts().call;
        self.invoke_within(arguments, deadline).await
    }

    /// Invoke with an end-to-end deadline covering session lookup and the call.
    pub async fn invoke_within(&self, arguments: &str, deadline: Duration) -> ToolOutput {
        let args = match parse_arguments(arguments, &self.descriptor.required) {
            Ok(args) => args,
            Err(reason) => return ToolOutput::error(reason),
        };

        let endpoint = &self.descriptor.endpoint;
        let operation = &self.descriptor.name;

        let call = async {
            let session = self.manager.get_session(endpoint).await?;
            session.call_tool(operation, args).await
        };

        let result = match tokio::time::timeout(deadline, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return ToolOutput::error(e.to_string()),
            Err(_) => {
                let err = GatewayError::Timeout {
                    endpoint: endpoint.clone(),
                    operation: operation.clone(),
                    after: deadline,
                };
                return ToolOutput::error(err.to_string());
            }
        };

        let text = content_text(&result);
        if result.is_error.unwrap_or(false) {
            debug!("MCP tool `{}` on `{}` reported an error", operation, endpoint);
            return ToolOutput::error(text);
        }

        let text = self
            .transforms
            .apply(operation, &text, result.structured_content.as_ref());
        ToolOutput::success(text)
    }
}
