//! Context payloads and per-channel context history.

pub mod store;

pub use store::ContextStore;

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A typed context payload.
///
/// Only `type` is interpreted by the router; every other field is carried
/// through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Context type, e.g. `fdc3.instrument`
    #[serde(rename = "type")]
    pub context_type: String,
    /// Remaining payload fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Context {
    /// Create an empty context of the given type.
    pub fn new(context_type: &str) -> Self {
        Self {
            context_type: context_type.to_string(),
            fields: serde_json::Map::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, key: &str, value: serde_json::Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Get a field.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Check if this context satisfies an optional type filter.
    pub fn matches_type(&self, filter: Option<&str>) -> bool {
        filter.map_or(true, |t| t == self.context_type)
    }

    /// Reject contexts without a usable type.
    pub fn validate(&self) -> Result<()> {
        if self.context_type.trim().is_empty() {
            return Err(Error::invalid("context type must not be empty"));
        }
        Ok(())
    }
}
