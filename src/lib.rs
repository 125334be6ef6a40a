// Core modules
pub mod auth;
pub mod config;
pub mod error;
mod http;
pub mod mcp;

// Caller-facing surface
pub mod gateway;
pub mod server;

// Re-export key types and functions
pub use auth::{TokenCache, TokenError};
pub use config::{GatewayConfig, OAuthConfig, Timeouts};
pub use error::GatewayError;
pub use gateway::Gateway;
pub use mcp::{
    AllowList, ConnectionManager, EndpointConfig, EndpointRegistry, InitializeSummary,
    OperationDescriptor, OperationProxy, ToolOutput, TransformRegistry,
};
pub use server::{GatewayServer, serve_stdio};
