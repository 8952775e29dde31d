//! Tool registry.

use crate::BoxedTool;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of available tools, ordered by ID.
pub struct ToolRegistry {
    tools: BTreeMap<String, BoxedTool>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Create a registry with all built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(crate::remote::ReadRemoteResourceTool));
        registry.register(Arc::new(crate::calculate::CalculateTool));
        registry.register(Arc::new(crate::read::ReadFileTool));
        registry.register(Arc::new(crate::write::WriteFileTool));
        registry.register(Arc::new(crate::list::ListDirectoryTool));

        registry
    }

    /// Register a tool, replacing any tool with the same ID.
    pub fn register(&mut self, tool: BoxedTool) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    /// Get a tool by ID.
    pub fn get(&self, id: &str) -> Option<&BoxedTool> {
        self.tools.get(id)
    }

    /// List all tool IDs.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get all tools.
    pub fn all(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.values()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
