// crates/mcpp-server/src/registry.rs
// ============================================================================
// Module: MCPP Tool Registry
// Description: Registered tool executors merged with configured policies.
// Purpose: Resolve tool names to executors, specs, and data policies.
// Dependencies: mcpp-config, mcpp-core
// ============================================================================

//! ## Overview
//! The registry maps tool names to executor implementations and their
//! [`ToolSpec`]. Per-tool sensitivity flags and data policies come from
//! configuration and are merged onto registered tools at startup; referencing
//! an unregistered tool in configuration is a hard error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use mcpp_config::ToolPolicyConfig;
use mcpp_core::core::EntryPayload;
use mcpp_core::core::TablePayload;
use mcpp_core::core::ToolSpec;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A tool name was registered twice.
    #[error("duplicate tool '{0}'")]
    Duplicate(String),
    /// Configuration referenced a tool that is not registered.
    #[error("unknown tool '{0}' in configuration")]
    UnknownTool(String),
}

/// Tool execution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolExecError {
    /// The supplied arguments are invalid for the tool.
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
    /// The tool failed while executing.
    #[error("tool execution failed: {0}")]
    Failed(String),
}

// ============================================================================
// SECTION: Executors
// ============================================================================

/// Output of a tool execution, standardized to an entry payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Standardized payload.
    pub payload: EntryPayload,
    /// Optional human-readable result message.
    pub message: Option<String>,
}

/// A tool implementation invoked by `tools/call`.
pub trait ToolExecutor: Send + Sync {
    /// Executes the tool with resolved arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolExecError`] when the arguments are invalid or the tool
    /// fails.
    fn execute(&self, arguments: &Value) -> Result<ToolOutput, ToolExecError>;
}

/// A registered tool: spec plus executor.
#[derive(Clone)]
pub struct RegisteredTool {
    /// Tool specification (name, schema, sensitivity, policy).
    spec: ToolSpec,
    /// Executor implementation.
    executor: Arc<dyn ToolExecutor>,
}

impl RegisteredTool {
    /// Returns the tool specification.
    #[must_use]
    pub const fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    /// Executes the tool with resolved arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolExecError`] when execution fails.
    pub fn execute(&self, arguments: &Value) -> Result<ToolOutput, ToolExecError> {
        self.executor.execute(arguments)
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Wire-visible tool definition for `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the tool arguments.
    pub input_schema: Value,
    /// Whether results are summarized behind a data reference.
    pub is_sensitive: bool,
}

/// Registry of tools exposed through `tools/call`.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    /// Registered tools keyed by name.
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool executor under its spec name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when the name is taken.
    pub fn register(
        &mut self,
        spec: ToolSpec,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<(), RegistryError> {
        if self.tools.contains_key(&spec.name) {
            return Err(RegistryError::Duplicate(spec.name));
        }
        self.tools.insert(spec.name.clone(), RegisteredTool {
            spec,
            executor,
        });
        Ok(())
    }

    /// Merges configured sensitivity flags and data policies onto tools.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownTool`] when configuration names an
    /// unregistered tool.
    pub fn apply_policies(&mut self, overrides: &[ToolPolicyConfig]) -> Result<(), RegistryError> {
        for entry in overrides {
            let Some(tool) = self.tools.get_mut(&entry.name) else {
                return Err(RegistryError::UnknownTool(entry.name.clone()));
            };
            tool.spec.is_sensitive = entry.sensitive;
            if let Some(policy) = &entry.data_policy {
                tool.spec.data_policy = Some(policy.clone());
            }
        }
        Ok(())
    }

    /// Returns the registered tool for a name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Returns the tool spec for a name.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(RegisteredTool::spec)
    }

    /// Returns wire-visible definitions in name order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.spec.name.clone(),
                description: tool.spec.description.clone(),
                input_schema: tool.spec.input_schema.clone(),
                is_sensitive: tool.spec.is_sensitive,
            })
            .collect()
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns true when no tool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ============================================================================
// SECTION: Builtin Tools
// ============================================================================

/// Builtin tool serving a fixed table, for local runs and tests.
pub struct StaticTableTool {
    /// Fixed table payload returned on every call.
    table: TablePayload,
    /// Result message returned alongside the payload.
    message: String,
}

impl StaticTableTool {
    /// Creates a static table tool.
    #[must_use]
    pub fn new(table: TablePayload, message: impl Into<String>) -> Self {
        Self {
            table,
            message: message.into(),
        }
    }

    /// Returns a demo contact-list tool and its spec.
    #[must_use]
    pub fn demo_contacts() -> (ToolSpec, Self) {
        let spec = ToolSpec {
            name: "list_contacts".to_string(),
            description: Some("List contacts from the demo address book".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            }),
            is_sensitive: true,
            data_policy: None,
        };
        let table = TablePayload::new(
            vec!["Name".to_string(), "Email".to_string()],
            vec![
                vec![json!("Ana Silva"), json!("ana@example.com")],
                vec![json!("Bo Park"), json!("bo@example.com")],
            ],
        );
        (spec, Self::new(table, "2 contacts listed"))
    }
}

impl ToolExecutor for StaticTableTool {
    fn execute(&self, arguments: &Value) -> Result<ToolOutput, ToolExecError> {
        if !arguments.is_object() && !arguments.is_null() {
            return Err(ToolExecError::InvalidArguments(
                "arguments must be an object".to_string(),
            ));
        }
        Ok(ToolOutput {
            payload: EntryPayload::Table(self.table.clone()),
            message: Some(self.message.clone()),
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only registry assertions.")]

    use std::sync::Arc;

    use mcpp_config::ToolPolicyConfig;
    use mcpp_core::core::DataPolicy;

    use super::RegistryError;
    use super::StaticTableTool;
    use super::ToolRegistry;

    fn demo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        let (spec, tool) = StaticTableTool::demo_contacts();
        registry.register(spec, Arc::new(tool)).unwrap();
        registry
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = demo_registry();
        let (spec, tool) = StaticTableTool::demo_contacts();
        let result = registry.register(spec, Arc::new(tool));
        assert_eq!(result, Err(RegistryError::Duplicate("list_contacts".to_string())));
    }

    #[test]
    fn apply_policies_merges_overrides() {
        let mut registry = demo_registry();
        registry
            .apply_policies(&[ToolPolicyConfig {
                name: "list_contacts".to_string(),
                sensitive: false,
                data_policy: Some(DataPolicy::default()),
            }])
            .unwrap();
        let spec = registry.spec("list_contacts").unwrap();
        assert!(!spec.is_sensitive);
        assert!(spec.data_policy.is_some());
    }

    #[test]
    fn apply_policies_rejects_unknown_tools() {
        let mut registry = demo_registry();
        let result = registry.apply_policies(&[ToolPolicyConfig {
            name: "missing".to_string(),
            sensitive: true,
            data_policy: None,
        }]);
        assert_eq!(result, Err(RegistryError::UnknownTool("missing".to_string())));
    }

    #[test]
    fn definitions_expose_sensitivity() {
        let registry = demo_registry();
        let definitions = registry.definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "list_contacts");
        assert!(definitions[0].is_sensitive);
    }
}
