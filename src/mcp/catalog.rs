//! Tool Catalog & Schema Converter (C5).
//!
//! Pure functions: MCP tool definitions in, OpenAI-style function-call
//! schemas out. Name collisions across servers are resolved by prefixing
//! `"<server>__<tool>"`; the catalog records each function's origin so the
//! Wrapper Adapter can route a `tool_call` back to the right session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a function-call-schema entry actually dispatches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOrigin {
    pub server_name: String,
    pub original_tool_name: String,
}

/// The widely-deployed "OpenAI function" shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One raw MCP tool definition as returned by `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

fn to_function_call_schema(server_name: &str, tool: &McpToolDef, prefixed_name: &str) -> FunctionCallSchema {
    log::debug!("converting tool {server_name}/{} to function schema {prefixed_name}", tool.name);
    FunctionCallSchema {
        kind: "function".to_string(),
        function: FunctionDef {
            name: prefixed_name.to_string(),
            description: tool.description.clone(),
            parameters: tool
                .input_schema
                .clone()
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
        },
    }
}

/// Aggregates tool definitions across one or more servers into a single,
/// collision-free function-call schema list.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    schemas: Vec<FunctionCallSchema>,
    origins: HashMap<String, ToolOrigin>,
    seen_names: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register all tools from one server, converting to function-call
    /// schema and resolving name collisions by prefixing.
    pub fn add_server_tools(&mut self, server_name: &str, tools: &[McpToolDef]) {
        for tool in tools {
            let bare = tool.name.clone();
            let count = self.seen_names.entry(bare.clone()).or_insert(0);
            let prefixed = if *count == 0 {
                bare.clone()
            } else {
                format!("{server_name}__{bare}")
            };
            *count += 1;

            // If this is the second registration of a bare name, the first
            // one (registered unprefixed) also needs re-keying — but since
            // origins are looked up by whatever name ended up in the
            // schema, we always additionally index the fully-prefixed form
            // so dispatch never needs to guess.
            let fully_prefixed = format!("{server_name}__{bare}");
            self.origins.insert(
                fully_prefixed.clone(),
                ToolOrigin {
                    server_name: server_name.to_string(),
                    original_tool_name: bare.clone(),
                },
            );

            let schema = to_function_call_schema(server_name, tool, &prefixed);
            self.origins.insert(
                prefixed.clone(),
                ToolOrigin {
                    server_name: server_name.to_string(),
                    original_tool_name: bare,
                },
            );
            self.schemas.push(schema);
        }
    }

    /// All function-call schemas accumulated so far.
    pub fn schemas(&self) -> &[FunctionCallSchema] {
        &self.schemas
    }

    /// Resolve a (possibly prefixed) function name back to its origin.
    pub fn origin_of(&self, function_name: &str) -> Option<&ToolOrigin> {
        self.origins.get(function_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> McpToolDef {
        McpToolDef {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: Some(serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}})),
        }
    }

    #[test]
    fn single_server_keeps_bare_names() {
        let mut catalog = ToolCatalog::new();
        catalog.add_server_tools("filesystem", &[tool("read_file")]);
        assert_eq!(catalog.schemas()[0].function.name, "read_file");
        assert_eq!(
            catalog.origin_of("read_file").unwrap().server_name,
            "filesystem"
        );
    }

    #[test]
    fn colliding_names_across_servers_are_prefixed() {
        let mut catalog = ToolCatalog::new();
        catalog.add_server_tools("filesystem", &[tool("search")]);
        catalog.add_server_tools("web", &[tool("search")]);

        let names: Vec<_> = catalog.schemas().iter().map(|s| s.function.name.clone()).collect();
        assert_eq!(names, vec!["search", "web__search"]);
        assert_eq!(
            catalog.origin_of("web__search").unwrap().original_tool_name,
            "search"
        );
    }

    #[test]
    fn function_schema_shape_matches_openai_convention() {
        let mut catalog = ToolCatalog::new();
        catalog.add_server_tools("filesystem", &[tool("read_file")]);
        let schema = &catalog.schemas()[0];
        assert_eq!(schema.kind, "function");
        assert_eq!(schema.function.parameters["type"], "object");
    }
}
