//! Canned search tools for exercising the tool-call loop without a backend

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use relaykit_core::ToolExecutor;
use serde_json::{Value, json};
use std::path::Path;
use tracing::info;

/// Answers `full_text_search`, `keyword_search` and `vector_search` with
/// fixed results built from the call's arguments
#[derive(Debug, Default)]
pub struct MockSearchTools;

#[async_trait]
impl ToolExecutor for MockSearchTools {
    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        info!("Mock tool {} called with {}", tool_name, arguments);
        let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");

        match tool_name {
            "full_text_search" => Ok(json!({
                "results": [
                    {"title": "Document 1", "content": format!("Full-text match for '{}'", query), "score": 0.95},
                    {"title": "Document 2", "content": format!("Another document containing '{}'", query), "score": 0.87}
                ],
                "total": 2
            })),
            "keyword_search" => {
                let keywords = arguments.get("keywords").cloned().unwrap_or_else(|| json!([]));
                Ok(json!({
                    "results": [
                        {"title": "Keyword document 1", "content": format!("Exact match for keywords {}", keywords), "score": 1.0},
                        {"title": "Keyword document 2", "content": format!("Another match for {}", keywords), "score": 0.92}
                    ],
                    "total": 2
                }))
            }
            "vector_search" => Ok(json!({
                "results": [
                    {"title": "Semantic document 1", "content": format!("Content related to '{}'", query), "similarity": 0.89},
                    {"title": "Semantic document 2", "content": "Another semantically similar passage", "similarity": 0.82}
                ],
                "total": 2
            })),
            other => bail!("Unknown tool: {}", other),
        }
    }
}

/// Load tool definitions from `{"tools": [...]}` or a bare array
pub fn load_tools(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tools file: {}", path.display()))?;
    parse_tools(&content).with_context(|| format!("Invalid tools file: {}", path.display()))
}

fn parse_tools(content: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(content)?;
    let tools = match value {
        Value::Array(tools) => tools,
        Value::Object(mut obj) => match obj.remove("tools") {
            Some(Value::Array(tools)) => tools,
            _ => bail!("expected a \"tools\" array"),
        },
        _ => bail!("expected a JSON array or an object with a \"tools\" array"),
    };
    for tool in &tools {
        if tool.pointer("/function/name").and_then(Value::as_str).is_none() {
            bail!("tool definition without function.name: {}", tool);
        }
    }
    Ok(tools)
}

/// Function names declared in a set of tool definitions
pub fn tool_names(tools: &[Value]) -> Vec<&str> {
    tools
        .iter()
        .filter_map(|t| t.pointer("/function/name").and_then(Value::as_str))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_text_search_echoes_query() {
        let out = MockSearchTools
            .execute("full_text_search", json!({"query": "retry"}))
            .await
            .unwrap();
        assert_eq!(out["total"], 2);
        assert!(out["results"][0]["content"].as_str().unwrap().contains("retry"));
    }

    #[tokio::test]
    async fn test_keyword_search_lists_keywords() {
        let out = MockSearchTools
            .execute("keyword_search", json!({"keywords": ["a", "b"]}))
            .await
            .unwrap();
        assert!(out["results"][0]["content"].as_str().unwrap().contains("[\"a\",\"b\"]"));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails() {
        let err = MockSearchTools.execute("delete_everything", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Unknown tool"));
    }

    #[test]
    fn test_parse_tools_wrapped_and_bare() {
        let def = r#"{"type": "function", "function": {"name": "vector_search", "description": "d", "parameters": {}}}"#;
        let wrapped = parse_tools(&format!(r#"{{"tools": [{}]}}"#, def)).unwrap();
        let bare = parse_tools(&format!("[{}]", def)).unwrap();
        assert_eq!(wrapped, bare);
        assert_eq!(tool_names(&wrapped), vec!["vector_search"]);
    }

    #[test]
    fn test_parse_tools_rejects_bad_shapes() {
        assert!(parse_tools(r#"{"functions": []}"#).is_err());
        assert!(parse_tools(r#"[{"type": "function"}]"#).is_err());
        assert!(parse_tools("42").is_err());
    }

    #[test]
    fn test_load_tools_missing_file() {
        let err = load_tools(Path::new("/nonexistent/tools.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read tools file"));
    }
}
