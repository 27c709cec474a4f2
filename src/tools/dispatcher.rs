use super::effects::EffectCall;
use crate::channels::{Channel, ChannelMessage, SendMessage};
use crate::error::AgentError;
use crate::memory::MemoryStore;
use crate::rules::{expand_template, RuleStore};
use crate::scheduler::{Scheduler, TaskHandle};
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The message an effect batch was triggered by.
#[derive(Debug, Clone)]
pub struct EffectContext {
    pub chat_id: String,
    pub message_id: String,
    pub sender_mention: String,
}

impl EffectContext {
    pub fn from_message(message: &ChannelMessage) -> Self {
        Self {
            chat_id: message.chat_id.clone(),
            message_id: message.id.clone(),
            sender_mention: message.sender_mention(),
        }
    }
}

/// Immediate acknowledgement of an executed effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectAck {
    Remembered { id: String },
    RuleRegistered { id: String, pattern: String },
    ReplyScheduled { handle: TaskHandle, delay_ms: u64 },
}

impl fmt::Display for EffectAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remembered { id } => write!(f, "remember: saved note {id}"),
            Self::RuleRegistered { id, pattern } => {
                write!(f, "auto_reply: rule {id} registered for `{pattern}`")
            }
            Self::ReplyScheduled { delay_ms, .. } => {
                write!(f, "reply_after: reply scheduled in {delay_ms} ms")
            }
        }
    }
}

pub type EffectResult = Result<EffectAck, AgentError>;

/// Executes effect calls against the chat's stores, scheduler and transport.
pub struct ToolEffectDispatcher {
    rules: Arc<RuleStore>,
    memories: Arc<MemoryStore>,
    scheduler: Arc<dyn Scheduler>,
    channel: Arc<dyn Channel>,
}

impl ToolEffectDispatcher {
    pub fn new(
        rules: Arc<RuleStore>,
        memories: Arc<MemoryStore>,
        scheduler: Arc<dyn Scheduler>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            rules,
            memories,
            scheduler,
            channel,
        }
    }

    pub async fn dispatch(&self, ctx: &EffectContext, call: EffectCall) -> EffectResult {
        match call {
            EffectCall::Remember { message } => {
                let note = self
                    .memories
                    .remember(&ctx.chat_id, &message)
                    .map_err(AgentError::Storage)?;
                Ok(EffectAck::Remembered { id: note.id })
            }
            EffectCall::AutoReply { when, message } => {
                let rule = self.rules.register_rule(&ctx.chat_id, &when, &message)?;
                tracing::info!(chat_id = %ctx.chat_id, rule_id = %rule.id, "Auto-reply registered");
                Ok(EffectAck::RuleRegistered {
                    id: rule.id,
                    pattern: rule.pattern,
                })
            }
            EffectCall::ReplyAfter {
                timeout_ms,
                message,
            } => {
                let text = expand_template(&message, None, &ctx.sender_mention);
                let reply = SendMessage::new(text, ctx.chat_id.clone())
                    .replying_to(Some(ctx.message_id.clone()));
                let channel = Arc::clone(&self.channel);
                let chat_id = ctx.chat_id.clone();

                let handle = self.scheduler.register(
                    Duration::from_millis(timeout_ms),
                    async move {
                        if let Err(e) = channel.send(&reply).await {
                            tracing::warn!(%chat_id, "Deferred reply was not delivered: {e:#}");
                        }
                    }
                    .boxed(),
                );
                Ok(EffectAck::ReplyScheduled {
                    handle,
                    delay_ms: timeout_ms,
                })
            }
        }
    }

    /// Run every call to completion. A failed parse or effect only affects
    /// its own slot; results keep input order.
    pub async fn dispatch_all(
        &self,
        ctx: &EffectContext,
        calls: Vec<Result<EffectCall, AgentError>>,
    ) -> Vec<EffectResult> {
        join_all(calls.into_iter().map(|call| async move {
            let result = match call {
                Ok(call) => self.dispatch(ctx, call).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                tracing::warn!(chat_id = %ctx.chat_id, kind = e.kind(), "Effect failed: {e}");
            }
            result
        }))
        .await
    }
}
