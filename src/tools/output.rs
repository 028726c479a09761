//! Typed tool result envelope.
//!
//! A tool's raw JSON value is inspected exactly once, here. Everything
//! downstream (guard counters, output messages, context patches) reads the
//! parsed fields.

use serde_json::Value;

use crate::session::{ContextPatch, TodoSnapshot};

/// Settled result of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// False when any failure signal is present.
    pub ok: bool,
    /// Raw value returned by the tool (or the error text).
    pub value: Value,
    /// Failure explanation extracted from the value, if any.
    pub error: Option<String>,
    pub context_patch: Option<ContextPatch>,
    pub todo: Option<TodoSnapshot>,
}

fn non_empty_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("error".to_string()),
        other => Some(other.to_string()),
    }
}

/// First text block of an MCP-style `content` array.
fn mcp_text(value: &Value) -> Option<String> {
    value
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|block| block.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

impl ToolOutput {
    /// Classify and parse a raw tool value.
    ///
    /// Failure signals, any one of which sets `ok = false`:
    /// - a non-empty `error` or `reason` field
    /// - `isError: true` (MCP envelope)
    /// - `success: false`
    pub fn from_value(value: Value) -> Self {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return Self::success(value),
        };

        let explicit = non_empty_text(obj.get("error")).or_else(|| non_empty_text(obj.get("reason")));
        let mcp_error = obj.get("isError").and_then(Value::as_bool) == Some(true);
        let unsuccessful = obj.get("success").and_then(Value::as_bool) == Some(false);

        let error = explicit.or_else(|| {
            if mcp_error {
                Some(mcp_text(&value).unwrap_or_else(|| "tool reported isError".to_string()))
            } else if unsuccessful {
                Some(
                    obj.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| "tool reported success: false".to_string()),
                )
            } else {
                None
            }
        });

        let context_patch = obj.get("contextPatch").and_then(|patch| {
            match serde_json::from_value::<ContextPatch>(patch.clone()) {
                Ok(p) if !p.is_empty() => Some(p),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Ignoring malformed contextPatch: {}", e);
                    None
                }
            }
        });
        let todo = obj.get("todo").and_then(TodoSnapshot::from_json);

        Self {
            ok: error.is_none(),
            value,
            error,
            context_patch,
            todo,
        }
    }

    fn success(value: Value) -> Self {
        Self {
            ok: true,
            value,
            error: None,
            context_patch: None,
            todo: None,
        }
    }

    /// Settle a call whose tool returned `Err`.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let text = format!("{:#}", error);
        Self {
            ok: false,
            value: Value::String(text.clone()),
            error: Some(text),
            context_patch: None,
            todo: None,
        }
    }

    /// Text fed back to the model as the tool message.
    pub fn model_content(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_each_failure_signal_is_independent() {
        assert!(!ToolOutput::from_value(json!({"error": "ENOENT"})).ok);
        assert!(!ToolOutput::from_value(json!({"reason": "denied"})).ok);
        assert!(!ToolOutput::from_value(json!({"isError": true, "content": [{"type": "text", "text": "boom"}]})).ok);
        assert!(!ToolOutput::from_value(json!({"success": false})).ok);

        assert!(ToolOutput::from_value(json!({"error": null, "success": true})).ok);
        assert!(ToolOutput::from_value(json!({"error": ""})).ok);
        assert!(ToolOutput::from_value(json!("plain text")).ok);
    }

    #[test]
    fn test_error_text_extracted() {
        let out = ToolOutput::from_value(json!({"isError": true, "content": [{"type": "text", "text": "boom"}]}));
        assert_eq!(out.error.as_deref(), Some("boom"));
        let out = ToolOutput::from_value(json!({"success": false, "message": "quota"}));
        assert_eq!(out.error.as_deref(), Some("quota"));
    }

    #[test]
    fn test_patch_and_todo_parsed_once() {
        let out = ToolOutput::from_value(json!({
            "result": "saved",
            "contextPatch": {"extra": {"branch": "main"}},
            "todo": [{"title": "ship it", "status": "done"}]
        }));
        assert!(out.ok);
        assert_eq!(out.context_patch.unwrap().extra["branch"], json!("main"));
        assert_eq!(out.todo.unwrap().items[0].title, "ship it");
    }

    #[test]
    fn test_malformed_patch_ignored() {
        let out = ToolOutput::from_value(json!({"contextPatch": {"memory": 5}}));
        assert!(out.ok);
        assert!(out.context_patch.is_none());
    }

    #[test]
    fn test_from_error_keeps_chain() {
        let err = anyhow::anyhow!("disk full").context("write failed");
        let out = ToolOutput::from_error(&err);
        assert!(!out.ok);
        assert_eq!(out.model_content(), "write failed: disk full");
    }
}
