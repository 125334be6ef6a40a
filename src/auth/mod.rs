//! Credential handling for upstream MCP endpoints.
//!
//! The gateway does not issue credentials. It only caches and reuses an
//! already-issued bearer token obtained through the OAuth2 client-credentials
//! grant, and attaches it to outgoing MCP connections.

pub mod token;

pub use token::{
    ClientCredentials, CredentialExchange, REFRESH_MARGIN, TokenCache, TokenError, TokenResponse,
};
