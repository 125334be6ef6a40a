//! Response transformers keyed by native operation name.
//!
//! A transformer reshapes a structured tool result into compact Markdown.
//! Transformation is best-effort: any failure hands back the raw text.

mod logs;
mod metrics;
mod traces;

use std::collections::HashMap;
use std::sync::Arc;

use rmcp::model::JsonObject;
use serde_json::Value;
use tracing::debug;

pub use logs::{ComponentLogsTransformer, ProjectLogsTransformer};
pub use metrics::ResourceMetricsTransformer;
pub use traces::TracesTransformer;

/// Reshapes the structured result of one operation.
pub trait ResponseTransformer: Send + Sync {
    /// Native operation name this transformer applies to.
    fn operation(&self) -> &str;

    fn transform(&self, content: &JsonObject) -> anyhow::Result<String>;
}

/// Registry for response transformers.
#[derive(Clone)]
pub struct TransformRegistry {
    transformers: HashMap<String, Arc<dyn ResponseTransformer>>,
}

impl TransformRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            transformers: HashMap::new(),
        }
    }

    pub fn register(mut self, transformer: Arc<dyn ResponseTransformer>) -> Self {
        self.transformers
            .insert(transformer.operation().to_string(), transformer);
        self
    }

    pub fn register_transformer<T: ResponseTransformer + 'static>(self, transformer: T) -> Self {
        self.register(Arc::new(transformer))
    }

    pub fn get(&self, operation: &str) -> Option<Arc<dyn ResponseTransformer>> {
        self.transformers.get(operation).cloned()
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.transformers.contains_key(operation)
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Transform `text` for `operation`, or return it unchanged.
    ///
    /// `structured` is used when the text itself is not a JSON object.
    pub fn apply(&self, operation: &str, text: &str, structured: Option<&Value>) -> String {
        let Some(transformer) = self.get(operation) else {
            return text.to_string();
        };

        let parsed = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => structured.and_then(|v| v.as_object()).cloned(),
        };
        let Some(content) = parsed else {
            debug!("Result of `{}` is not a JSON object, passing through", operation);
            return text.to_string();
        };

        match transformer.transform(&content) {
            Ok(rendered) if !rendered.trim().is_empty() => rendered,
            Ok(_) => text.to_string(),
            Err(e) => {
                debug!("Transform for `{}` failed, passing through: {:#}", operation, e);
                text.to_string()
            }
        }
    }
}

impl Default for TransformRegistry {
    /// Registry with the built-in observability transformers.
    fn default() -> Self {
        Self::new()
            .register_transformer(ComponentLogsTransformer)
            .register_transformer(ProjectLogsTransformer)
            .register_transformer(ResourceMetricsTransformer)
            .register_transformer(TracesTransformer)
    }
}

/// First string field present among `keys`.
pub(crate) fn str_field<'a>(obj: &'a JsonObject, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| obj.get(*key).and_then(Value::as_str))
}

/// First numeric field present among `keys`. Numeric strings are accepted.
pub(crate) fn num_field(obj: &JsonObject, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// First array field present among `keys`.
pub(crate) fn array_field<'a>(obj: &'a JsonObject, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|key| obj.get(*key).and_then(Value::as_array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Failing;

    impl ResponseTransformer for Failing {
        fn operation(&self) -> &str {
            "get_traces"
        }

        fn transform(&self, _content: &JsonObject) -> anyhow::Result<String> {
            anyhow::bail!("unexpected shape")
        }
    }

    #[test]
    fn test_default_registry_covers_observability_operations() {
        let registry = TransformRegistry::default();

        assert_eq!(registry.len(), 4);
        for op in [
            "get_component_logs",
            "get_project_logs",
            "get_component_resource_metrics",
            "get_traces",
        ] {
            assert!(registry.contains(op), "missing {}", op);
        }
        assert!(!registry.contains("list_projects"));
    }

    #[test]
    fn test_apply_passes_through_without_transformer() {
        let registry = TransformRegistry::default();
        assert_eq!(registry.apply("list_projects", "[1,2]", None), "[1,2]");
    }

    #[test]
    fn test_apply_passes_through_on_error() {
        let registry = TransformRegistry::new().register_transformer(Failing);
        assert_eq!(registry.apply("get_traces", r#"{"a": 1}"#, None), r#"{"a": 1}"#);
    }

    #[test]
    fn test_apply_passes_through_on_missing_collection() {
        let registry = TransformRegistry::default();
        let text = r#"{"unexpected": true}"#;
        assert_eq!(registry.apply("get_component_logs", text, None), text);
    }

    #[test]
    fn test_apply_falls_back_to_structured_content() {
        let registry = TransformRegistry::default();
        let structured = json!({ "logs": [], "totalCount": 0 });

        let out = registry.apply("get_component_logs", "see structured content", Some(&structured));
        assert_eq!(out, "No log entries found.");
    }

    #[test]
    fn test_field_helpers() {
        let obj = json!({ "level": "INFO", "value": "4.5", "items": [1] });
        let obj = obj.as_object().unwrap();

        assert_eq!(str_field(obj, &["logLevel", "level"]), Some("INFO"));
        assert_eq!(num_field(obj, &["value"]), Some(4.5));
        assert_eq!(array_field(obj, &["entries", "items"]).map(Vec::len), Some(1));
        assert_eq!(str_field(obj, &["missing"]), None);
    }
}
