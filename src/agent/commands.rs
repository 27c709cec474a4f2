//! Slash commands for inspecting and pruning a chat's automation state.

use crate::context::ContextCache;
use crate::memory::MemoryStore;
use crate::rules::{RuleSelector, RuleStore};
use crate::store::Database;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Rules,
    Unrule(RuleSelector),
    Memories,
    /// `None` forgets every note of the chat.
    Forget(Option<String>),
    /// `None` resets the chat to the global window.
    Window(Option<usize>),
    Usage(&'static str),
}

impl ChatCommand {
    /// Recognize a command. Unknown slash words are ordinary messages.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (word, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(word, arg)| (word, arg.trim()));
        // `/rules@my_bot` addresses a specific bot in group chats.
        let word = word.split('@').next().unwrap_or(word);

        let command = match word {
            "rules" => Self::Rules,
            "unrule" => match RuleSelector::parse(arg) {
                Some(selector) => Self::Unrule(selector),
                None => Self::Usage("/unrule <id|all>"),
            },
            "memories" => Self::Memories,
            "forget" => match arg {
                "" => Self::Usage("/forget <id|all>"),
                "all" => Self::Forget(None),
                id => Self::Forget(Some(id.to_string())),
            },
            "window" => match arg {
                "reset" => Self::Window(None),
                raw => match raw.parse::<usize>() {
                    Ok(n) if n > 0 => Self::Window(Some(n)),
                    _ => Self::Usage("/window <n|reset>"),
                },
            },
            _ => return None,
        };
        Some(command)
    }
}

/// Stores a command may read or change.
pub struct CommandTargets<'a> {
    pub db: &'a Database,
    pub rules: &'a RuleStore,
    pub memories: &'a MemoryStore,
    pub context: &'a ContextCache,
}

/// Execute `command` for `chat_id` and return the chat reply.
pub fn execute(command: &ChatCommand, chat_id: &str, targets: &CommandTargets<'_>) -> String {
    match run(command, chat_id, targets) {
        Ok(reply) => reply,
        Err(e) => format!("⚠️ {e}"),
    }
}

fn run(
    command: &ChatCommand,
    chat_id: &str,
    targets: &CommandTargets<'_>,
) -> anyhow::Result<String> {
    match command {
        ChatCommand::Usage(usage) => Ok(format!("Usage: {usage}")),
        ChatCommand::Rules => {
            let listing = targets.rules.list_rules(chat_id)?;
            if listing.is_empty() {
                return Ok("No auto-replies in this chat.".into());
            }
            let mut out = format!("Auto-replies ({}):", listing.len());
            for entry in listing {
                let _ = write!(
                    out,
                    "\n• {} `{}` → {}",
                    entry.rule.id, entry.rule.pattern, entry.rule.template
                );
                if let Some(error) = entry.compile_error {
                    let _ = write!(out, " ⚠️ {error}");
                }
            }
            Ok(out)
        }
        ChatCommand::Unrule(selector) => {
            let removed = targets.rules.remove_rule(chat_id, selector)?;
            Ok(format!("Removed {removed} auto-repl{}.", plural_y(removed)))
        }
        ChatCommand::Memories => {
            let notes = targets.memories.recall(chat_id, crate::memory::MAX_RECALL)?;
            if notes.is_empty() {
                return Ok("Nothing remembered in this chat.".into());
            }
            let mut out = format!("Memories ({}):", notes.len());
            for note in notes {
                let _ = write!(out, "\n• {} {}", note.id, note.note);
            }
            Ok(out)
        }
        ChatCommand::Forget(id) => {
            let removed = targets.memories.forget(chat_id, id.as_deref())?;
            Ok(format!(
                "Forgot {removed} note{}.",
                if removed == 1 { "" } else { "s" }
            ))
        }
        ChatCommand::Window(window) => {
            let effective = targets.context.set_chat_window(chat_id, *window);
            targets.db.set_context_window(chat_id, window.map(|_| effective))?;
            Ok(match window {
                Some(requested) if *requested > effective => format!(
                    "Context window set to {effective} messages (capped from {requested})."
                ),
                Some(_) => format!("Context window set to {effective} messages."),
                None => format!("Context window reset to {effective} messages."),
            })
        }
    }
}

fn plural_y(count: usize) -> &'static str {
    if count == 1 {
        "y"
    } else {
        "ies"
    }
}
