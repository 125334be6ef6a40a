//! Static endpoint registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::GatewayError;

/// Connection parameters for one remote MCP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    /// Attached to every request on the endpoint's channel.
    pub headers: BTreeMap<String, String>,
    pub tls_skip_verify: bool,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            tls_skip_verify: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Name-keyed endpoint descriptors, loaded once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, Arc<EndpointConfig>>,
}

impl EndpointRegistry {
    pub fn new(endpoints: impl IntoIterator<Item = EndpointConfig>) -> Result<Self, GatewayError> {
        let mut map = BTreeMap::new();
        for endpoint in endpoints {
            if endpoint.name.is_empty() {
                return Err(GatewayError::InvalidConfig(
                    "endpoint name must not be empty".to_string(),
                ));
            }
            let name = endpoint.name.clone();
            if map.insert(name.clone(), Arc::new(endpoint)).is_some() {
                return Err(GatewayError::InvalidConfig(format!(
                    "duplicate endpoint name `{}`",
                    name
                )));
            }
        }
        Ok(Self { endpoints: map })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EndpointConfig>> {
        self.endpoints.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// Endpoint names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EndpointConfig>> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_rejects_duplicates() {
        let err = EndpointRegistry::new(vec![
            EndpointConfig::new("observer", "http://a/mcp"),
            EndpointConfig::new("observer", "http://b/mcp"),
        ])
        .unwrap_err();

        assert!(err.to_string().contains("duplicate endpoint name `observer`"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = EndpointRegistry::new(vec![
            EndpointConfig::new("observer", "http://a/mcp").with_header("X-Org", "default"),
            EndpointConfig::new("choreo", "http://b/mcp"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("choreo"));
        assert!(!registry.contains("unknown"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["choreo", "observer"]);
        assert_eq!(
            registry.get("observer").unwrap().headers.get("X-Org").map(String::as_str),
            Some("default")
        );
    }
}
