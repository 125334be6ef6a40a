//! Error types for gateway operations.

use std::fmt;
use std::time::Duration;

/// Errors surfaced by the connection manager and gateway.
#[derive(Debug)]
pub enum GatewayError {
    /// The endpoint name was never part of the endpoint registry.
    NotConfigured(String),

    /// A fresh connection could not be established for the endpoint.
    Reconnect {
        endpoint: String,
        source: anyhow::Error,
    },

    /// A remote-facing call did not finish within its deadline.
    Timeout {
        endpoint: String,
        operation: String,
        after: Duration,
    },

    /// The session was already closed when it was used.
    SessionClosed(String),

    /// Configuration could not be turned into endpoints.
    InvalidConfig(String),
}

impl GatewayError {
    /// Whether this error is an expected outcome of the remote side hanging up.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::SessionClosed(_))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured(name) => write!(f, "mcp '{}' not configured", name),
            Self::Reconnect { endpoint, source } => {
                write!(f, "reconnection to mcp '{}' failed: {}", endpoint, source)
            }
            Self::Timeout {
                endpoint,
                operation,
                after,
            } => write!(
                f,
                "{} on mcp '{}' timed out after {:.1}s",
                operation,
                endpoint,
                after.as_secs_f64()
            ),
            Self::SessionClosed(name) => write!(f, "session for mcp '{}' is closed", name),
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Reconnect { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::NotConfigured("observer".to_string());
        assert_eq!(err.to_string(), "mcp 'observer' not configured");

        let err = GatewayError::Timeout {
            endpoint: "observer".to_string(),
            operation: "liveness probe".to_string(),
            after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "liveness probe on mcp 'observer' timed out after 5.0s");
    }

    #[test]
    fn test_reconnect_error_keeps_cause() {
        let err = GatewayError::Reconnect {
            endpoint: "choreo".to_string(),
            source: anyhow::anyhow!("connection refused"),
        };

        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.source().map(|s| s.to_string()), Some("connection refused".to_string()));
    }
}
