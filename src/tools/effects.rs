//! The three chat effects the model may invoke, with their input schemas.

use super::traits::ToolSpec;
use crate::error::AgentError;
use serde::Deserialize;
use serde_json::{json, Value};

pub const REMEMBER: &str = "remember";
pub const AUTO_REPLY: &str = "auto_reply";
pub const REPLY_AFTER: &str = "reply_after";

/// A validated effect invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectCall {
    Remember {
        message: String,
    },
    AutoReply {
        when: String,
        message: String,
    },
    ReplyAfter {
        #[serde(alias = "timeout", alias = "timeoutMs")]
        timeout_ms: u64,
        message: String,
    },
}

impl EffectCall {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Remember { .. } => REMEMBER,
            Self::AutoReply { .. } => AUTO_REPLY,
            Self::ReplyAfter { .. } => REPLY_AFTER,
        }
    }

    /// Parse a live tool call: `name` selects the effect, `arguments` is the
    /// raw JSON object the model streamed.
    pub fn from_tool(name: &str, arguments: &str) -> Result<Self, AgentError> {
        let payload = format!("{name} {arguments}");
        let raw = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        let mut value: Value = serde_json::from_str(raw)
            .map_err(|e| AgentError::validation(&payload, format!("arguments are not JSON: {e}")))?;
        let Some(object) = value.as_object_mut() else {
            return Err(AgentError::validation(
                payload,
                "arguments must be a JSON object",
            ));
        };
        object.insert("kind".into(), Value::String(name.to_string()));
        Self::from_value(value, &payload)
    }

    /// Parse a legacy fenced payload carrying its own `kind` tag.
    pub fn from_payload(raw: &str) -> Result<Self, AgentError> {
        let value: Value = serde_json::from_str(raw.trim())
            .map_err(|e| AgentError::validation(raw.trim(), format!("payload is not JSON: {e}")))?;
        if !value.is_object() {
            return Err(AgentError::validation(
                raw.trim(),
                "payload must be a JSON object",
            ));
        }
        Self::from_value(value, raw.trim())
    }

    fn from_value(value: Value, payload: &str) -> Result<Self, AgentError> {
        let kind = value.get("kind").and_then(Value::as_str).unwrap_or_default();
        if ![REMEMBER, AUTO_REPLY, REPLY_AFTER].contains(&kind) {
            return Err(AgentError::validation(
                payload,
                format!("unknown kind '{kind}'"),
            ));
        }
        let call: Self = serde_json::from_value(value)
            .map_err(|e| AgentError::validation(payload, e.to_string()))?;
        call.validate(payload)?;
        Ok(call)
    }

    fn validate(&self, payload: &str) -> Result<(), AgentError> {
        let blank = |field: &str| {
            AgentError::validation(payload, format!("'{field}' must not be empty"))
        };
        match self {
            Self::Remember { message } if message.trim().is_empty() => Err(blank("message")),
            Self::AutoReply { when, .. } if when.trim().is_empty() => Err(blank("when")),
            Self::AutoReply { message, .. } if message.trim().is_empty() => Err(blank("message")),
            Self::ReplyAfter { timeout_ms: 0, .. } => Err(AgentError::validation(
                payload,
                "'timeout_ms' must be at least 1",
            )),
            Self::ReplyAfter { message, .. } if message.trim().is_empty() => {
                Err(blank("message"))
            }
            _ => Ok(()),
        }
    }
}

/// Tool schemas handed to the generation service.
pub fn effect_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: REMEMBER.into(),
            description: "Store a note about this chat. Notes are included in future prompts."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "The note to keep" }
                },
                "required": ["message"]
            }),
        },
        ToolSpec {
            name: AUTO_REPLY.into(),
            description: "Register an automatic reply. Whenever a chat message matches the \
                          case-insensitive regex `when`, `message` is sent in reply. `$1`, `$2` \
                          insert capture groups and `$sender` mentions the author."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "when": { "type": "string", "description": "Regular expression to match" },
                    "message": { "type": "string", "description": "Reply template" }
                },
                "required": ["when", "message"]
            }),
        },
        ToolSpec {
            name: REPLY_AFTER.into(),
            description: "Send `message` as a reply to the current message after `timeout_ms` \
                          milliseconds. `$sender` mentions the author."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "timeout_ms": { "type": "integer", "minimum": 1, "description": "Delay in milliseconds" },
                    "message": { "type": "string", "description": "Reply template" }
                },
                "required": ["timeout_ms", "message"]
            }),
        },
    ]
}
