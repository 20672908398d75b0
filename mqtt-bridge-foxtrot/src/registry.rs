//! Immutable lookup table of configured variables.

use std::collections::HashMap;

use crate::config::VariableConfig;

/// The configured variables, in configuration order, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: Vec<VariableConfig>,
    index: HashMap<String, usize>,
}

impl VariableRegistry {
    /// Build a registry. Later duplicates of a name are ignored for lookups.
    pub fn new(variables: Vec<VariableConfig>) -> Self {
        let mut index = HashMap::with_capacity(variables.len());
        for (position, variable) in variables.iter().enumerate() {
            index.entry(variable.name.clone()).or_insert(position);
        }
        Self { variables, index }
    }

    pub fn get(&self, name: &str) -> Option<&VariableConfig> {
        self.index.get(name).map(|&position| &self.variables[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableConfig> {
        self.variables.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
