//! Configuration for the MCP session runtime.

use std::time::Duration;

/// Protocol constants and default tunables.
pub mod protocol {
    use std::time::Duration;

    /// Protocol revision this runtime speaks. Negotiation requires an exact
    /// match.
    pub const VERSION: &str = "2025-03-26";

    /// Default wait for a response to an outbound request.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Stdio transport tunables.
pub mod stdio {
    use std::time::Duration;

    /// Wait for a clean exit after closing the child's stdin.
    pub const STDIN_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Wait after sending the terminate signal.
    pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Wait after sending the kill signal.
    pub const KILL_TIMEOUT: Duration = Duration::from_secs(2);
}

/// Streamable HTTP transport tunables.
pub mod http {
    use std::time::Duration;

    /// Default endpoint path for the single MCP endpoint.
    pub const ENDPOINT_PATH: &str = "/mcp";

    /// Session cookie header name.
    pub const SESSION_HEADER: &str = "Mcp-Session-Id";

    /// Protocol version header name.
    pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

    /// Per-POST timeout on the client transport.
    pub const POST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Timeout for opening a server-initiated GET stream.
    pub const GET_STREAM_TIMEOUT: Duration = Duration::from_secs(10);

    /// Timeout for the session-termination DELETE.
    pub const DELETE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Keep-alive interval on server SSE streams.
    pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);
}

/// Which `Origin` headers the HTTP server transport accepts.
#[derive(Debug, Clone, Default)]
pub enum OriginPolicy {
    /// Accept any origin, including absent.
    #[default]
    AllowAll,
    /// Accept only the listed origins. Requests without an `Origin` header
    /// are accepted (non-browser clients).
    Allowlist(Vec<String>),
}

impl OriginPolicy {
    /// Check an `Origin` header value against the policy.
    #[must_use]
    pub fn accepts(&self, origin: Option<&str>) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Allowlist(allowed) => {
                origin.is_none_or(|o| allowed.iter().any(|a| a == o))
            }
        }
    }
}

/// Configuration for the Streamable HTTP server transport.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Endpoint path accepting POST, GET, and DELETE.
    pub endpoint_path: String,

    /// Bind address.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Protocol version required in `MCP-Protocol-Version`.
    pub protocol_version: String,

    /// Origin validation policy.
    pub origin_policy: OriginPolicy,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            endpoint_path: http::ENDPOINT_PATH.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            protocol_version: protocol::VERSION.to_string(),
            origin_policy: OriginPolicy::AllowAll,
        }
    }
}

/// Configuration shared by both session roles.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Protocol revision to negotiate. Peers advertising anything else are
    /// disconnected.
    pub protocol_version: String,

    /// Default timeout for outbound requests.
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_version: protocol::VERSION.to_string(),
            request_timeout: protocol::REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_policy_allow_all() {
        let policy = OriginPolicy::AllowAll;
        assert!(policy.accepts(None));
        assert!(policy.accepts(Some("http://evil.example")));
    }

    #[test]
    fn test_origin_policy_allowlist() {
        let policy = OriginPolicy::Allowlist(vec!["http://localhost:3000".to_string()]);
        assert!(policy.accepts(Some("http://localhost:3000")));
        assert!(!policy.accepts(Some("http://evil.example")));
        assert!(policy.accepts(None));
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.protocol_version, protocol::VERSION);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
