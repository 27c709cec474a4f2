use async_trait::async_trait;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    Assistant,
}

/// A message received from or synthesized into a chat
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    /// Platform username without the `@` prefix, when the sender has one.
    pub sender_handle: Option<String>,
    pub content: String,
    pub timestamp: u64,
    pub origin: Origin,
}

impl ChannelMessage {
    /// How templates address the sender: `@handle`, or the display name.
    pub fn sender_mention(&self) -> String {
        match self.sender_handle.as_deref().map(str::trim) {
            Some(handle) if !handle.is_empty() => {
                format!("@{}", handle.trim_start_matches('@'))
            }
            _ => self.sender_name.clone(),
        }
    }
}

/// Message to send through a channel
#[derive(Debug, Clone)]
pub struct SendMessage {
    pub content: String,
    pub recipient: String,
    pub reply_to: Option<String>,
}

impl SendMessage {
    pub fn new(content: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            recipient: recipient.into(),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: Option<String>) -> Self {
        self.reply_to = message_id;
        self
    }
}

/// Core channel trait, implemented by every messaging transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Send a message; returns the platform message id.
    async fn send(&self, message: &SendMessage) -> anyhow::Result<String>;

    /// Replace the text of a previously sent message.
    async fn edit(&self, chat_id: &str, message_id: &str, text: &str) -> anyhow::Result<()>;

    /// Start listening for incoming messages (long-running)
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()>;

    /// Convert renderer markup into the platform's safe rich-text form.
    fn render(&self, markup: &str) -> String {
        markup.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(handle: Option<&str>) -> ChannelMessage {
        ChannelMessage {
            id: "1".into(),
            chat_id: "chat".into(),
            sender_id: "u1".into(),
            sender_name: "Alice".into(),
            sender_handle: handle.map(str::to_string),
            content: "hi".into(),
            timestamp: 0,
            origin: Origin::User,
        }
    }

    #[test]
    fn sender_mention_prefers_handle() {
        assert_eq!(message(Some("alice")).sender_mention(), "@alice");
        assert_eq!(message(Some("@alice")).sender_mention(), "@alice");
    }

    #[test]
    fn sender_mention_falls_back_to_display_name() {
        assert_eq!(message(None).sender_mention(), "Alice");
        assert_eq!(message(Some("  ")).sender_mention(), "Alice");
    }

    #[test]
    fn send_message_reply_target() {
        let msg = SendMessage::new("hello", "chat").replying_to(Some("42".into()));
        assert_eq!(msg.reply_to.as_deref(), Some("42"));
        assert_eq!(msg.recipient, "chat");
    }
}
