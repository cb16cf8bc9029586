//! Immutable registry of workflow definitions.
//!
//! Definitions are data supplied at process start; the registry maps
//! definition ids to templates for instantiation and next-step routing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::definition::WorkflowDefinition;

/// Immutable definition lookup, shared across the engine.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl DefinitionRegistry {
    pub fn builder() -> DefinitionRegistryBuilder {
        DefinitionRegistryBuilder::default()
    }

    pub fn get(&self, definition_id: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(definition_id)
    }

    pub fn contains(&self, definition_id: &str) -> bool {
        self.definitions.contains_key(definition_id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn definition_ids(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }
}

/// Builder for [`DefinitionRegistry`].
#[derive(Debug, Default)]
pub struct DefinitionRegistryBuilder {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl DefinitionRegistryBuilder {
    /// Register a definition; the last registration for an id wins.
    pub fn register(mut self, definition: WorkflowDefinition) -> Self {
        self.definitions
            .insert(definition.definition_id.clone(), definition);
        self
    }

    pub fn build(self) -> Arc<DefinitionRegistry> {
        Arc::new(DefinitionRegistry {
            definitions: self.definitions,
        })
    }
}
