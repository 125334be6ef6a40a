//! Remote MCP endpoints: sessions, connection management and invocation.

pub mod endpoint;
pub mod filter;
pub mod manager;
pub mod operation;
pub mod session;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use endpoint::{EndpointConfig, EndpointRegistry};
pub use filter::{AllowList, DEFAULT_ALLOWED_OPERATIONS};
pub use manager::{ConnectionManager, InitializeSummary};
pub use operation::{
    OperationDescriptor, OperationProxy, ToolOutput, content_text, parse_arguments,
    qualified_name, split_qualified_name,
};
pub use session::{Connector, RmcpSession, Session, StreamableHttpConnector};
pub use transform::{ResponseTransformer, TransformRegistry};
