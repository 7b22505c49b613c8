//! Tool registry: built once at startup, read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

use super::schema::ToolDescriptor;
use super::validator::{collect_schema, Patterns};

/// Collects descriptors during startup.
///
/// [`RegistryBuilder::build`] freezes the builder into a [`Registry`]; there
/// is no way to add or remove tools once the server is accepting requests.
#[derive(Default)]
pub struct RegistryBuilder {
    tools: HashMap<String, ToolDescriptor>,
    patterns: Patterns,
    read_only: bool,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, mutating tools are left out of the built registry.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Register a tool. Fails on a duplicate name or an unusable schema.
    pub fn register(&mut self, tool: ToolDescriptor) -> CoreResult<()> {
        if self.tools.contains_key(&tool.name) {
            return Err(CoreError::DuplicateTool(tool.name));
        }
        let patterns =
            collect_schema(&tool.input_schema).map_err(|message| CoreError::InvalidSchema {
                tool: tool.name.clone(),
                message,
            })?;
        self.patterns.extend(patterns);
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub fn build(self) -> Registry {
        let read_only = self.read_only;
        let mut tools = HashMap::with_capacity(self.tools.len());
        let mut skipped = Vec::new();

        for (name, tool) in self.tools {
            if read_only && tool.side_effect.is_mutating() {
                skipped.push(name);
                continue;
            }
            tools.insert(name, Arc::new(tool));
        }

        if !skipped.is_empty() {
            skipped.sort();
            tracing::info!(
                skipped = %skipped.join(","),
                "read-only mode: mutating tools not registered"
            );
        }

        Registry {
            tools,
            patterns: self.patterns,
            read_only,
        }
    }
}

/// Immutable snapshot mapping tool name to descriptor.
#[derive(Debug, Default)]
pub struct Registry {
    tools: HashMap<String, Arc<ToolDescriptor>>,
    patterns: Patterns,
    read_only: bool,
}

impl Registry {
    pub fn lookup(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.tools.get(name)
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<&Arc<ToolDescriptor>> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Patterns compiled from every registered schema.
    pub fn patterns(&self) -> &Patterns {
        &self.patterns
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
