//! Static allow-list applied to aggregated operations.

use std::collections::HashSet;

use crate::mcp::OperationDescriptor;

/// Native operation names exposed by default.
pub const DEFAULT_ALLOWED_OPERATIONS: &[&str] = &[
    "get_traces",
    "get_component_logs",
    "get_project_logs",
    "get_component_resource_metrics",
    "list_environments",
    "list_organizations",
    "list_projects",
    "list_components",
];

/// Set-membership filter on native operation names.
#[derive(Debug, Clone)]
pub struct AllowList {
    allowed: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self, operation: &str) -> bool {
        self.allowed.contains(operation)
    }

    /// Keep only allowed operations, preserving order.
    pub fn filter(&self, operations: Vec<OperationDescriptor>) -> Vec<OperationDescriptor> {
        operations
            .into_iter()
            .filter(|op| self.is_allowed(&op.name))
            .collect()
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_OPERATIONS.iter().copied())
    }
}
