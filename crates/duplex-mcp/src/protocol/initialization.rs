//! Initialization handshake shapes: capabilities, implementation info, and
//! the `initialize` request/result pair.
//!
//! The `sampling` and `elicitation` client capabilities have no configuration
//! options, so they are modeled as booleans. On the wire `true` becomes `{}`
//! and `false` omits the field entirely.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::meta::Meta;

/// Name and version of the client or server software.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into() }
    }
}

/// Capability for listing and monitoring filesystem roots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootsCapability {
    /// Whether the client sends notifications when roots change.
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Wire codec for flag capabilities: `true` <-> `{}`, `false` <-> absent.
mod flag {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::{Map, Value};

    pub fn serialize<S: Serializer>(_value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        // Only reached when the flag is true; false is skipped entirely.
        Value::Object(Map::new()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Option::<Value>::deserialize(deserializer).map(|v| v.is_some())
    }
}

/// Capabilities the client supports, sent during initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Experimental or non-standard capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Map<String, Value>>,

    /// Filesystem roots listing and monitoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,

    /// LLM sampling support from the host.
    #[serde(default, with = "flag", skip_serializing_if = "is_false")]
    pub sampling: bool,

    /// Support for user-input elicitation.
    #[serde(default, with = "flag", skip_serializing_if = "is_false")]
    pub elicitation: bool,
}

/// Capabilities for prompt management and notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptsCapability {
    /// Whether the server sends notifications when prompts change.
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities for resource access and change monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesCapability {
    /// Whether clients can subscribe to resource change updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,

    /// Whether the server sends notifications when resources change.
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities for tool execution and change notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// Whether the server sends notifications when tools change.
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities the server supports, sent during initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Experimental or non-standard capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Map<String, Value>>,

    /// Logging capability configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Map<String, Value>>,

    /// Completion capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completions: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

impl ServerCapabilities {
    /// True if the server advertised `resources.subscribe`.
    #[must_use]
    pub fn supports_subscribe(&self) -> bool {
        self.resources.as_ref().and_then(|r| r.subscribe).unwrap_or(false)
    }

    /// True if the server advertised the logging capability.
    #[must_use]
    pub fn supports_logging(&self) -> bool {
        self.logging.is_some()
    }

    /// True if the server advertised the completions capability.
    #[must_use]
    pub fn supports_completions(&self) -> bool {
        self.completions.is_some()
    }
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,

    #[serde(default)]
    pub capabilities: ClientCapabilities,

    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Server's reply to `initialize`, completing the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    pub capabilities: ServerCapabilities,

    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,

    /// Optional setup or usage instructions for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sampling_flag_wire_format() {
        let caps = ClientCapabilities { sampling: true, ..Default::default() };
        let value = serde_json::to_value(&caps).unwrap();
        assert_eq!(value["sampling"], json!({}));

        let caps = ClientCapabilities::default();
        let value = serde_json::to_value(&caps).unwrap();
        assert!(value.get("sampling").is_none());
    }

    #[test]
    fn test_sampling_flag_parses_from_object() {
        let caps: ClientCapabilities = serde_json::from_value(json!({"sampling": {}})).unwrap();
        assert!(caps.sampling);
        assert!(!caps.elicitation);

        let caps: ClientCapabilities = serde_json::from_value(json!({})).unwrap();
        assert!(!caps.sampling);
    }

    #[test]
    fn test_server_capability_predicates() {
        let caps: ServerCapabilities = serde_json::from_value(json!({
            "logging": {},
            "resources": {"subscribe": true, "listChanged": true}
        }))
        .unwrap();
        assert!(caps.supports_logging());
        assert!(caps.supports_subscribe());
        assert!(!caps.supports_completions());
    }

    #[test]
    fn test_initialize_params_round_trip() {
        let params = InitializeParams {
            protocol_version: "2025-03-26".to_string(),
            client_info: Implementation::new("test-client", "1.0.0"),
            capabilities: ClientCapabilities {
                roots: Some(RootsCapability { list_changed: Some(true) }),
                sampling: true,
                ..Default::default()
            },
            meta: None,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["protocolVersion"], json!("2025-03-26"));
        assert_eq!(value["capabilities"]["roots"]["listChanged"], json!(true));
        let parsed: InitializeParams = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, params);
    }
}
