//! The `params._meta` envelope.
//!
//! `_meta` is reserved under `params`. It carries the `progressToken` plus
//! arbitrary application metadata. Reserved keys in application metadata
//! silently yield to the reserved spelling.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Token a peer echoes back in `notifications/progress`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    Num(i64),
    Str(String),
}

impl From<&str> for ProgressToken {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<i64> for ProgressToken {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}

const RESERVED_KEYS: &[&str] = &["progressToken"];

/// Request metadata envelope, serialized under `params._meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "progressToken", default, skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<ProgressToken>,

    /// Application metadata, flattened alongside the reserved keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    /// Envelope carrying only a progress token.
    #[must_use]
    pub fn with_token(token: impl Into<ProgressToken>) -> Self {
        Self { progress_token: Some(token.into()), extra: Map::new() }
    }

    /// Envelope carrying application metadata. Reserved keys are dropped.
    #[must_use]
    pub fn with_extra(mut extra: Map<String, Value>) -> Self {
        for key in RESERVED_KEYS {
            extra.remove(*key);
        }
        Self { progress_token: None, extra }
    }

    /// Add one application metadata entry. Reserved keys are ignored.
    #[must_use]
    pub fn insert(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !RESERVED_KEYS.contains(&key.as_str()) {
            self.extra.insert(key, value);
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.progress_token.is_none() && self.extra.is_empty()
    }
}
