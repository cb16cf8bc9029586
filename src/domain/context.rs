//! Free-form runtime state attached to a workflow.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mutable key/value state shared between steps of one workflow.
///
/// Variables hold business data flowing between steps; headers carry
/// propagated metadata (trace ids, tenant); system properties hold
/// engine-internal bookkeeping (saga transaction id, retry due times).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub variables: HashMap<String, serde_json::Value>,
    pub headers: HashMap<String, String>,
    pub system_properties: HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        self.variables.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.variables.remove(key)
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set_system(&mut self, key: &str, value: serde_json::Value) {
        self.system_properties.insert(key.to_string(), value);
    }

    pub fn system(&self, key: &str) -> Option<&serde_json::Value> {
        self.system_properties.get(key)
    }

    pub fn clear(&mut self) {
        self.variables.clear();
        self.headers.clear();
        self.system_properties.clear();
    }

    /// Overlay another context's entries onto this one.
    pub fn merge(&mut self, other: &ExecutionContext) {
        self.variables
            .extend(other.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.headers
            .extend(other.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.system_properties.extend(
            other
                .system_properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
}
