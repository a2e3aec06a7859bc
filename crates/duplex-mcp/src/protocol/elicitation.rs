//! Elicitation message shapes: `elicitation/create`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::meta::Meta;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitParams {
    /// Message presented to the user.
    pub message: String,

    /// JSON Schema the response content must satisfy.
    #[serde(rename = "requestedSchema")]
    pub requested_schema: Value,

    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// How the user responded to the elicitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitAction {
    Accept,
    Decline,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitResult {
    pub action: ElicitAction,

    /// Present only when the action is `accept`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}
