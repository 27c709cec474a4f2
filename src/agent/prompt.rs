use crate::channels::{ChannelMessage, Origin};
use crate::memory::MemoryNote;
use crate::providers::ChatMessage;
use crate::tools::{ToolSpec, EXEC_LABEL};
use chrono::Utc;
use std::fmt::Write;

pub struct PromptContext<'a> {
    pub system_prompt: &'a str,
    pub memories: &'a [MemoryNote],
    pub tools: &'a [ToolSpec],
}

pub trait PromptSection: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self, ctx: &PromptContext<'_>) -> String;
}

#[derive(Default)]
pub struct SystemPromptBuilder {
    sections: Vec<Box<dyn PromptSection>>,
}

impl SystemPromptBuilder {
    pub fn with_defaults() -> Self {
        Self {
            sections: vec![
                Box::new(IdentitySection),
                Box::new(MemorySection),
                Box::new(EffectsSection),
                Box::new(DateTimeSection),
            ],
        }
    }

    pub fn build(&self, ctx: &PromptContext<'_>) -> String {
        let mut output = String::new();
        for section in &self.sections {
            let part = section.build(ctx);
            if part.trim().is_empty() {
                continue;
            }
            output.push_str(part.trim_end());
            output.push_str("\n\n");
        }
        output.trim_end().to_string()
    }
}

pub struct IdentitySection;
pub struct MemorySection;
pub struct EffectsSection;
pub struct DateTimeSection;

impl PromptSection for IdentitySection {
    fn name(&self) -> &str {
        "identity"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> String {
        ctx.system_prompt.to_string()
    }
}

impl PromptSection for MemorySection {
    fn name(&self) -> &str {
        "memory"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> String {
        if ctx.memories.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Things you were asked to remember (newest first)\n");
        for note in ctx.memories {
            let _ = writeln!(out, "- {}", note.note);
        }
        out
    }
}

impl PromptSection for EffectsSection {
    fn name(&self) -> &str {
        "effects"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> String {
        if ctx.tools.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Chat effects\n");
        for tool in ctx.tools {
            let _ = writeln!(out, "- `{}`: {}", tool.name, tool.description);
        }
        let _ = write!(
            out,
            "\nIf you cannot call tools, put a JSON object with a `kind` field \
             (one of the names above) in a fenced block labelled `{EXEC_LABEL}`."
        );
        out
    }
}

impl PromptSection for DateTimeSection {
    fn name(&self) -> &str {
        "datetime"
    }

    fn build(&self, _ctx: &PromptContext<'_>) -> String {
        format!("Current time (UTC): {}", Utc::now().format("%Y-%m-%d %H:%M"))
    }
}

/// System prompt followed by the chat window as role-tagged turns.
pub fn build_messages(system_prompt: String, history: &[ChannelMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system_prompt));
    for message in history {
        messages.push(match message.origin {
            Origin::User => {
                ChatMessage::user(format!("{}: {}", message.sender_mention(), message.content))
            }
            Origin::Assistant => ChatMessage::assistant(message.content.clone()),
        });
    }
    messages
}
