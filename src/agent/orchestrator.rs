use super::commands::{self, ChatCommand, CommandTargets};
use super::prompt::{build_messages, PromptContext, SystemPromptBuilder};
use crate::channels::{Channel, ChannelMessage, Origin, SendMessage};
use crate::config::{AgentConfig, Config};
use crate::context::ContextCache;
use crate::error::AgentError;
use crate::memory::MemoryStore;
use crate::providers::{ChatRequest, Provider};
use crate::render::{
    abort_on_cancel, DeliverySink, RenderError, RenderOptions, StreamRenderer,
};
use crate::rules::RuleStore;
use crate::scheduler::Scheduler;
use crate::store::Database;
use crate::tools::{
    block_report, dispatch_exec_blocks, effect_specs, EffectCall, EffectContext,
    ToolEffectDispatcher, ToolSpec,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Edits the placeholder message with each rendered snapshot.
struct PlaceholderSink<'a> {
    channel: &'a dyn Channel,
    chat_id: &'a str,
    message_id: &'a str,
}

#[async_trait]
impl DeliverySink for PlaceholderSink<'_> {
    async fn deliver(&self, snapshot: &str, _is_final: bool) -> Result<()> {
        let text = self.channel.render(snapshot);
        self.channel.edit(self.chat_id, self.message_id, &text).await
    }
}

/// Per-message pipeline: cache, commands, auto-replies, generation and
/// effects.
pub struct Orchestrator {
    agent: AgentConfig,
    recall_limit: usize,
    db: Database,
    context: Arc<ContextCache>,
    rules: Arc<RuleStore>,
    memories: Arc<MemoryStore>,
    dispatcher: ToolEffectDispatcher,
    provider: Arc<dyn Provider>,
    channel: Arc<dyn Channel>,
    renderer: StreamRenderer,
    tools: Vec<ToolSpec>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        channel: Arc<dyn Channel>,
        provider: Arc<dyn Provider>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let db = Database::new(config.database_path());
        let rules = Arc::new(RuleStore::new(
            db.clone(),
            Duration::from_secs(config.rules.cache_ttl_secs),
        ));
        let memories = Arc::new(MemoryStore::new(db.clone()));
        let dispatcher = ToolEffectDispatcher::new(
            Arc::clone(&rules),
            Arc::clone(&memories),
            scheduler,
            Arc::clone(&channel),
        );
        let context = Arc::new(ContextCache::new(config.context.max_window));
        for (chat_id, window) in &config.context.chat_windows {
            context.set_chat_window(chat_id, Some(*window));
        }

        Self {
            agent: config.agent.clone(),
            recall_limit: config.memory.recall_limit,
            db,
            context,
            rules,
            memories,
            dispatcher,
            provider,
            channel,
            renderer: StreamRenderer::new(RenderOptions::from(&config.stream)),
            tools: effect_specs(),
        }
    }

    pub fn context(&self) -> &ContextCache {
        &self.context
    }

    /// Apply window overrides persisted by `/window`. Stored values win over
    /// the config file.
    pub fn restore_context_windows(&self) -> Result<usize> {
        let windows = self.db.context_windows()?;
        for (chat_id, window) in &windows {
            self.context.set_chat_window(chat_id, Some(*window));
        }
        Ok(windows.len())
    }

    pub async fn handle_message(
        &self,
        message: ChannelMessage,
        cancellation: CancellationToken,
    ) -> Result<(), AgentError> {
        if !self.context.add_message(&message) {
            tracing::debug!(chat_id = %message.chat_id, "Ignoring message without text or sender");
            return Ok(());
        }

        if let Some(command) = ChatCommand::parse(&message.content) {
            let reply = commands::execute(
                &command,
                &message.chat_id,
                &CommandTargets {
                    db: &self.db,
                    rules: &self.rules,
                    memories: &self.memories,
                    context: &self.context,
                },
            );
            self.reply(&message, reply).await;
            return Ok(());
        }

        self.run_auto_replies(&message).await;

        if !self.should_generate(&message) {
            return Ok(());
        }
        self.respond(&message, cancellation).await
    }

    fn should_generate(&self, message: &ChannelMessage) -> bool {
        if message.origin != Origin::User {
            return false;
        }
        if self.agent.respond_to_all {
            return true;
        }
        let text = message.content.trim_start();
        if self
            .agent
            .trigger_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && text.starts_with(prefix.as_str()))
        {
            return true;
        }
        self.agent.bot_handle.as_deref().is_some_and(|handle| {
            let mention = format!("@{}", handle.trim_start_matches('@')).to_lowercase();
            text.to_lowercase().contains(&mention)
        })
    }

    async fn run_auto_replies(&self, message: &ChannelMessage) {
        let evaluation = match self.rules.match_incoming(&message.chat_id, message) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                tracing::warn!(chat_id = %message.chat_id, "Auto-reply lookup failed: {e:#}");
                return;
            }
        };

        for diagnostic in &evaluation.diagnostics {
            tracing::warn!(
                chat_id = %message.chat_id,
                rule_id = %diagnostic.rule_id,
                pattern = %diagnostic.pattern,
                "Skipping auto-reply with invalid pattern: {}",
                diagnostic.error
            );
        }
        for reply in evaluation.replies {
            tracing::debug!(chat_id = %message.chat_id, rule_id = %reply.rule_id, "Auto-reply fired");
            self.reply(message, reply.text).await;
        }
    }

    /// Best-effort reply to `message`; failures are logged.
    async fn reply(&self, message: &ChannelMessage, text: String) -> Option<String> {
        let outgoing = SendMessage::new(self.channel.render(&text), message.chat_id.clone())
            .replying_to(Some(message.id.clone()));
        match self.channel.send(&outgoing).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    chat_id = %message.chat_id,
                    channel = self.channel.name(),
                    "Failed to send reply: {e:#}"
                );
                None
            }
        }
    }

    async fn respond(
        &self,
        message: &ChannelMessage,
        cancellation: CancellationToken,
    ) -> Result<(), AgentError> {
        let chat_id = message.chat_id.as_str();
        let memories = self
            .memories
            .recall(chat_id, self.recall_limit)
            .unwrap_or_else(|e| {
                tracing::warn!(%chat_id, "Failed to load memories: {e:#}");
                Vec::new()
            });
        let system_prompt = SystemPromptBuilder::with_defaults().build(&PromptContext {
            system_prompt: &self.agent.system_prompt,
            memories: &memories,
            tools: &self.tools,
        });
        let history = self.context.get_messages(chat_id, None);
        let messages = build_messages(system_prompt, &history);

        let placeholder = SendMessage::new(
            self.channel.render(&self.renderer.options().placeholder),
            chat_id,
        )
        .replying_to(Some(message.id.clone()));
        let placeholder_id = self
            .channel
            .send(&placeholder)
            .await
            .map_err(AgentError::Transport)?;

        tracing::info!(%chat_id, turns = messages.len(), "Starting generation");
        let events = match self
            .provider
            .stream_chat(ChatRequest {
                messages: &messages,
                tools: &self.tools,
            })
            .await
        {
            Ok(events) => abort_on_cancel(events, cancellation),
            Err(e) => {
                self.apologize(message, &placeholder_id).await;
                return Err(AgentError::Upstream(format!("{e:#}")));
            }
        };

        let sink = PlaceholderSink {
            channel: self.channel.as_ref(),
            chat_id,
            message_id: &placeholder_id,
        };
        let outcome = match self.renderer.render(events, &sink).await {
            Ok(outcome) => outcome,
            Err(RenderError::Upstream(reason)) => {
                self.apologize(message, &placeholder_id).await;
                return Err(AgentError::Upstream(reason));
            }
            Err(RenderError::Delivery(e)) => return Err(AgentError::Transport(e)),
        };
        if outcome.aborted {
            tracing::info!(%chat_id, "Generation interrupted");
        }

        let ctx = EffectContext::from_message(message);
        if !outcome.tool_calls.is_empty() {
            let calls = outcome
                .tool_calls
                .iter()
                .map(|call| EffectCall::from_tool(&call.name, &call.arguments))
                .collect();
            let results = self.dispatcher.dispatch_all(&ctx, calls).await;
            let ack = results
                .iter()
                .map(block_report)
                .collect::<Vec<_>>()
                .join("\n");
            self.reply(message, ack).await;
        }

        for result in dispatch_exec_blocks(&self.dispatcher, &ctx, &outcome.answer).await {
            self.reply(message, block_report(&result)).await;
        }

        let answer = outcome.answer.trim();
        if !answer.is_empty() {
            let bot = self
                .agent
                .bot_handle
                .clone()
                .unwrap_or_else(|| "assistant".to_string());
            self.context.add_message(&ChannelMessage {
                id: placeholder_id,
                chat_id: chat_id.to_string(),
                sender_id: bot.clone(),
                sender_name: bot.clone(),
                sender_handle: self.agent.bot_handle.clone(),
                content: answer.to_string(),
                timestamp: chrono::Utc::now().timestamp().try_into().unwrap_or_default(),
                origin: Origin::Assistant,
            });
        }
        Ok(())
    }

    /// Exactly one apology: edit the placeholder, or post anew if that fails.
    async fn apologize(&self, message: &ChannelMessage, placeholder_id: &str) {
        let text = self.channel.render(&self.agent.apology);
        match self
            .channel
            .edit(&message.chat_id, placeholder_id, &text)
            .await
        {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(chat_id = %message.chat_id, "Could not edit placeholder: {e:#}");
                self.reply(message, self.agent.apology.clone()).await;
            }
        }
    }
}
