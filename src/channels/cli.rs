use super::traits::{Channel, ChannelMessage, Origin, SendMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{self, AsyncBufReadExt, BufReader};

const CLI_CHAT_ID: &str = "cli";

/// Console channel over stdin/stdout with a single chat.
///
/// A line of the form `@handle: text` is attributed to `handle`, which makes
/// it possible to exercise rules and `$sender` expansion from a terminal.
pub struct CliChannel {
    next_message_id: AtomicU64,
    default_sender: String,
}

impl CliChannel {
    pub fn new() -> Self {
        let default_sender = std::env::var("USER")
            .ok()
            .filter(|user| !user.trim().is_empty())
            .unwrap_or_else(|| "user".to_string());
        Self {
            next_message_id: AtomicU64::new(1),
            default_sender,
        }
    }

    fn allocate_id(&self) -> String {
        self.next_message_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string()
    }

    fn parse_line(&self, line: &str) -> ChannelMessage {
        let (handle, content) = match line.strip_prefix('@').and_then(|rest| rest.split_once(':')) {
            Some((handle, content)) if !handle.trim().is_empty() && !handle.contains(' ') => {
                (Some(handle.trim().to_string()), content.trim().to_string())
            }
            _ => (None, line.to_string()),
        };
        let sender = handle.clone().unwrap_or_else(|| self.default_sender.clone());

        ChannelMessage {
            id: self.allocate_id(),
            chat_id: CLI_CHAT_ID.to_string(),
            sender_id: sender.clone(),
            sender_name: sender,
            sender_handle: handle,
            content,
            timestamp: chrono::Utc::now().timestamp().try_into().unwrap_or_default(),
            origin: Origin::User,
        }
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send(&self, message: &SendMessage) -> anyhow::Result<String> {
        let id = self.allocate_id();
        match &message.reply_to {
            Some(reply_to) => println!("[#{id} ↩ #{reply_to}] {}", message.content),
            None => println!("[#{id}] {}", message.content),
        }
        Ok(id)
    }

    async fn edit(&self, _chat_id: &str, message_id: &str, text: &str) -> anyhow::Result<()> {
        println!("[#{message_id} edited] {text}");
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<ChannelMessage>) -> anyhow::Result<()> {
        let stdin = io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line == "/quit" || line == "/exit" {
                break;
            }

            if tx.send(self.parse_line(&line)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
