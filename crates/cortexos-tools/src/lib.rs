//! Tool Registry & Executor (spec.md §4.C).

mod tools;

pub use tools::{BashTool, EditTool, GitTool, GlobTool, GrepTool, ReadTool, WriteTool};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use cortexos_types::{ToolContext, ToolResult, ToolSchema};

/// Output is truncated at this byte cap so downstream context windows stay
/// bounded (spec.md §4.C).
pub const MAX_TOOL_OUTPUT_BYTES: usize = 32 * 1024;

pub fn truncate_output(output: String) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_BYTES {
        return output;
    }
    let mut cut = MAX_TOOL_OUTPUT_BYTES;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated_bytes = output.len() - cut;
    let mut result = String::with_capacity(cut + 32);
    result.push_str(&output[..cut]);
    result.push_str(&format!("\n...[truncated {truncated_bytes} bytes]"));
    result
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult>;
    async fn execute_with_cancel(
        &self,
        args: Value,
        ctx: &ToolContext,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ToolResult> {
        self.execute(args, ctx).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSchemaValidationError {
    pub tool_name: String,
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for ToolSchemaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid tool schema `{}` at `{}`: {}",
            self.tool_name, self.path, self.reason
        )
    }
}

impl std::error::Error for ToolSchemaValidationError {}

/// Validates the JSON-schema subset CortexOS understands: object
/// properties, array `items`, and the `oneOf`/`anyOf`/`allOf` combinators.
/// Run once at registry build time and again before every agent call.
pub fn validate_tool_schemas(schemas: &[ToolSchema]) -> Result<(), ToolSchemaValidationError> {
    for schema in schemas {
        validate_schema_node(&schema.name, "$", &schema.input_schema)?;
    }
    Ok(())
}

fn validate_schema_node(
    tool_name: &str,
    path: &str,
    value: &Value,
) -> Result<(), ToolSchemaValidationError> {
    let Some(obj) = value.as_object() else {
        if let Some(arr) = value.as_array() {
            for (idx, item) in arr.iter().enumerate() {
                validate_schema_node(tool_name, &format!("{path}[{idx}]"), item)?;
            }
        }
        return Ok(());
    };

    if obj.get("type").and_then(|t| t.as_str()) == Some("array") && !obj.contains_key("items") {
        return Err(ToolSchemaValidationError {
            tool_name: tool_name.to_string(),
            path: path.to_string(),
            reason: "array schema missing items".to_string(),
        });
    }

    if let Some(items) = obj.get("items") {
        validate_schema_node(tool_name, &format!("{path}.items"), items)?;
    }
    if let Some(props) = obj.get("properties").and_then(|v| v.as_object()) {
        for (key, child) in props {
            validate_schema_node(tool_name, &format!("{path}.properties.{key}"), child)?;
        }
    }
    for combinator in ["oneOf", "anyOf", "allOf"] {
        if let Some(variants) = obj.get(combinator).and_then(|v| v.as_array()) {
            for (idx, child) in variants.iter().enumerate() {
                validate_schema_node(tool_name, &format!("{path}.{combinator}[{idx}]"), child)?;
            }
        }
    }

    Ok(())
}

/// Checks `args` against a schema's `required` list; fails before the tool
/// is ever invoked.
pub fn validate_args(schema: &ToolSchema, args: &Value) -> Result<(), ToolSchemaValidationError> {
    let Some(obj) = schema.input_schema.as_object() else {
        return Ok(());
    };
    let Some(required) = obj.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    let provided = args.as_object();
    for field in required {
        let Some(field_name) = field.as_str() else {
            continue;
        };
        let present = provided
            .map(|o| o.contains_key(field_name))
            .unwrap_or(false);
        if !present {
            return Err(ToolSchemaValidationError {
                tool_name: schema.name.clone(),
                path: format!("$.{field_name}"),
                reason: "required field missing from arguments".to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let mut map: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        map.insert("bash".to_string(), Arc::new(BashTool));
        map.insert("read".to_string(), Arc::new(ReadTool));
        map.insert("write".to_string(), Arc::new(WriteTool));
        map.insert("edit".to_string(), Arc::new(EditTool));
        map.insert("glob".to_string(), Arc::new(GlobTool));
        map.insert("grep".to_string(), Arc::new(GrepTool));
        map.insert("git".to_string(), Arc::new(GitTool));
        Self {
            tools: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn register(&self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.write().await.insert(name.into(), tool);
    }

    pub async fn list(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .read()
            .await
            .values()
            .map(|t| t.schema())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Looks up `name`, validates `args` against its schema, runs it, and
    /// truncates its output. Never propagates an error: any failure —
    /// unknown tool, bad args, tool panic, tool error — becomes a failed
    /// `ToolResult` so the agent loop can keep running.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> anyhow::Result<ToolResult> {
        let tool = {
            let tools = self.tools.read().await;
            let Some(tool) = tools.get(name) else {
                return Ok(ToolResult {
                    success: false,
                    output: String::new(),
                    error: Some(format!("unknown tool: {name}")),
                    metadata: None,
                });
            };
            tool.clone()
        };

        let schema = tool.schema();
        if let Err(err) = validate_args(&schema, &args) {
            return Ok(ToolResult {
                success: false,
                output: String::new(),
                error: Some(err.to_string()),
                metadata: None,
            });
        }

        let outcome = std::panic::AssertUnwindSafe(tool.execute_with_cancel(args, ctx, cancel))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(mut result)) => {
                result.output = truncate_output(result.output);
                result
            }
            Ok(Err(err)) => ToolResult {
                success: false,
                output: String::new(),
                error: Some(err.to_string()),
                metadata: None,
            },
            Err(_) => ToolResult {
                success: false,
                output: String::new(),
                error: Some("tool panicked".to_string()),
                metadata: None,
            },
        };
        Ok(result)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncates_output_past_the_cap() {
        let long = "a".repeat(MAX_TOOL_OUTPUT_BYTES + 100);
        let truncated = truncate_output(long);
        assert!(truncated.contains("[truncated 100 bytes]"));
        assert!(truncated.len() < MAX_TOOL_OUTPUT_BYTES + 100);
    }

    #[test]
    fn leaves_short_output_untouched() {
        let short = "hello".to_string();
        assert_eq!(truncate_output(short.clone()), short);
    }

    #[test]
    fn rejects_array_schema_missing_items() {
        let schema = ToolSchema {
            name: "broken".to_string(),
            description: String::new(),
            input_schema: json!({"type": "array"}),
        };
        assert!(validate_tool_schemas(&[schema]).is_err());
    }

    #[test]
    fn accepts_well_formed_schema() {
        let schema = ToolSchema {
            name: "ok".to_string(),
            description: String::new(),
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
            }),
        };
        assert!(validate_tool_schemas(&[schema]).is_ok());
    }

    #[test]
    fn rejects_missing_required_arg() {
        let schema = ToolSchema {
            name: "ok".to_string(),
            description: String::new(),
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
            }),
        };
        assert!(validate_args(&schema, &json!({})).is_err());
    }

    #[tokio::test]
    async fn unknown_tool_fails_closed_without_throwing() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext {
            working_dir: std::path::PathBuf::from("."),
            execution_id: "exec-1".to_string(),
        };
        let result = registry
            .execute("does-not-exist", json!({}), &ctx, CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn registry_schemas_are_unique_and_valid() {
        let registry = ToolRegistry::new();
        let schemas = registry.list().await;
        validate_tool_schemas(&schemas).expect("registry tool schemas should validate");
        let unique: std::collections::HashSet<_> =
            schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(unique.len(), schemas.len());
    }
}
