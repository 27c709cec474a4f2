use crate::tools::ToolSpec;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Request payload for a streamed generation.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSpec],
}

/// One partial-output event of a streamed generation, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// Model reasoning ("thinking") text.
    ReasoningDelta(String),
    /// User-facing answer text.
    TextDelta(String),
    /// A tool call started streaming its arguments; it becomes the active tool.
    ToolInputStart { id: String, name: String },
    /// Raw argument fragment for the active tool.
    ToolInputDelta(String),
    /// The active tool finished streaming its arguments.
    ToolInputEnd,
    /// A complete tool invocation.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// Stop rendering; nothing after this is consumed.
    Abort,
}

/// Result type for streaming operations.
pub type StreamResult<T> = std::result::Result<T, StreamError>;

pub type EventStream = BoxStream<'static, StreamResult<GenerationEvent>>;

/// Errors that can occur during streaming.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid SSE format: {0}")]
    InvalidSse(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

/// The generation service.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start a streamed generation. Errors before the first event (bad
    /// credentials, unreachable endpoint) are returned here; later failures
    /// arrive as `Err` items of the stream.
    async fn stream_chat(&self, request: ChatRequest<'_>) -> anyhow::Result<EventStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_constructors_tag_roles() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").role, "assistant");
    }

    #[test]
    fn stream_error_display() {
        let err = StreamError::InvalidSse("missing data".into());
        assert_eq!(err.to_string(), "Invalid SSE format: missing data");
    }
}
