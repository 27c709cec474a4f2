/// Failure taxonomy for chat-scoped processing.
///
/// Every variant is confined to the chat that produced it: callers report
/// or log it and keep serving other chats.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A tool input or legacy `exec` payload failed its schema check.
    #[error("invalid effect payload ({reason}): {payload}")]
    Validation { payload: String, reason: String },

    /// An auto-reply pattern is not a valid regular expression.
    #[error("pattern `{pattern}` does not compile: {reason}")]
    RuleCompile { pattern: String, reason: String },

    /// A send/edit call on the chat transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// The generation service call or its event stream failed.
    #[error("generation failed: {0}")]
    Upstream(String),

    /// The persistence layer rejected a read or write.
    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl AgentError {
    pub fn validation(payload: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            payload: payload.into(),
            reason: reason.into(),
        }
    }

    /// Short label used in chat acknowledgements.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::RuleCompile { .. } => "rule_compile",
            Self::Transport(_) => "transport",
            Self::Upstream(_) => "upstream",
            Self::Storage(_) => "storage",
        }
    }
}
