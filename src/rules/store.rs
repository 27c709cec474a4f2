use super::{
    compile_pattern, expand_template, AutoReplyRule, RuleDiagnostic, RuleEvaluation, RuleListing,
    RuleReply, RuleSelector,
};
use crate::channels::ChannelMessage;
use crate::error::AgentError;
use crate::store::{parse_rfc3339, sql_conversion_error, Database};
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::params;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct LoadedRules {
    loaded_at: Instant,
    rules: Arc<Vec<AutoReplyRule>>,
}

/// Chat-scoped auto-reply rules backed by the state database.
///
/// Rows are reused for `row_ttl` per chat and compiled patterns are kept per
/// rule id; both caches are dropped for a chat whenever its rules change.
pub struct RuleStore {
    db: Database,
    row_ttl: Duration,
    rows: Mutex<HashMap<String, LoadedRules>>,
    compiled: Mutex<HashMap<String, Result<Regex, String>>>,
}

impl RuleStore {
    pub fn new(db: Database, row_ttl: Duration) -> Self {
        Self {
            db,
            row_ttl,
            rows: Mutex::new(HashMap::new()),
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a new rule. Patterns that do not compile are rejected here so
    /// that a stored rule is always usable.
    pub fn register_rule(
        &self,
        chat_id: &str,
        pattern: &str,
        template: &str,
    ) -> Result<AutoReplyRule, AgentError> {
        if pattern.trim().is_empty() {
            return Err(AgentError::validation(pattern, "pattern must not be empty"));
        }
        if template.trim().is_empty() {
            return Err(AgentError::validation(template, "reply must not be empty"));
        }
        let compiled = compile_pattern(pattern).map_err(|e| AgentError::RuleCompile {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let rule = AutoReplyRule {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            pattern: pattern.to_string(),
            template: template.to_string(),
            created_at: Utc::now(),
        };

        self.db
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO auto_reply_rules (id, chat_id, pattern, template, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        rule.id,
                        rule.chat_id,
                        rule.pattern,
                        rule.template,
                        rule.created_at.to_rfc3339(),
                    ],
                )
                .context("Failed to insert auto-reply rule")?;
                Ok(())
            })
            .map_err(AgentError::Storage)?;

        self.compiled.lock().insert(rule.id.clone(), Ok(compiled));
        self.invalidate_chat(chat_id);
        tracing::info!(chat_id, rule_id = %rule.id, pattern, "Registered auto-reply rule");
        Ok(rule)
    }

    /// Evaluate every rule of the chat against an incoming message.
    ///
    /// All matching rules fire, in storage order. A rule whose pattern fails
    /// to compile becomes a diagnostic and does not affect the others.
    pub fn match_incoming(
        &self,
        chat_id: &str,
        message: &ChannelMessage,
    ) -> Result<RuleEvaluation> {
        let rules = self.rules_for_chat(chat_id)?;
        let sender = message.sender_mention();
        let mut evaluation = RuleEvaluation::default();

        for rule in rules.iter() {
            let regex = match self.compiled_for(rule) {
                Ok(regex) => regex,
                Err(error) => {
                    evaluation.diagnostics.push(RuleDiagnostic {
                        rule_id: rule.id.clone(),
                        pattern: rule.pattern.clone(),
                        error,
                    });
                    continue;
                }
            };

            if let Some(captures) = regex.captures(&message.content) {
                evaluation.replies.push(RuleReply {
                    rule_id: rule.id.clone(),
                    text: expand_template(&rule.template, Some(&captures), &sender),
                });
            }
        }

        Ok(evaluation)
    }

    pub fn list_rules(&self, chat_id: &str) -> Result<Vec<RuleListing>> {
        let rules = self.load_rules(chat_id)?;
        Ok(rules
            .into_iter()
            .map(|rule| {
                let compile_error = self.compiled_for(&rule).err();
                RuleListing {
                    rule,
                    compile_error,
                }
            })
            .collect())
    }

    /// Delete one rule owned by the chat, or all of them. Returns how many
    /// rules were removed.
    pub fn remove_rule(&self, chat_id: &str, selector: &RuleSelector) -> Result<usize> {
        let removed_ids: Vec<String> = match selector {
            RuleSelector::Id(id) => {
                let changed = self.db.with_connection(|conn| {
                    conn.execute(
                        "DELETE FROM auto_reply_rules WHERE id = ?1 AND chat_id = ?2",
                        params![id, chat_id],
                    )
                    .context("Failed to delete auto-reply rule")
                })?;
                if changed == 0 {
                    anyhow::bail!("Rule '{id}' not found in this chat");
                }
                vec![id.clone()]
            }
            RuleSelector::All => {
                let ids: Vec<String> = self
                    .load_rules(chat_id)?
                    .into_iter()
                    .map(|rule| rule.id)
                    .collect();
                self.db.with_connection(|conn| {
                    conn.execute(
                        "DELETE FROM auto_reply_rules WHERE chat_id = ?1",
                        params![chat_id],
                    )
                    .context("Failed to delete auto-reply rules")?;
                    Ok(())
                })?;
                ids
            }
        };

        {
            let mut compiled = self.compiled.lock();
            for id in &removed_ids {
                compiled.remove(id);
            }
        }
        self.invalidate_chat(chat_id);
        tracing::info!(chat_id, removed = removed_ids.len(), "Removed auto-reply rules");
        Ok(removed_ids.len())
    }

    fn invalidate_chat(&self, chat_id: &str) {
        self.rows.lock().remove(chat_id);
    }

    fn rules_for_chat(&self, chat_id: &str) -> Result<Arc<Vec<AutoReplyRule>>> {
        if let Some(loaded) = self.rows.lock().get(chat_id) {
            if loaded.loaded_at.elapsed() < self.row_ttl {
                return Ok(Arc::clone(&loaded.rules));
            }
        }

        let rules = Arc::new(self.load_rules(chat_id)?);
        self.rows.lock().insert(
            chat_id.to_string(),
            LoadedRules {
                loaded_at: Instant::now(),
                rules: Arc::clone(&rules),
            },
        );
        Ok(rules)
    }

    fn compiled_for(&self, rule: &AutoReplyRule) -> Result<Regex, String> {
        if let Some(cached) = self.compiled.lock().get(&rule.id) {
            return cached.clone();
        }

        let compiled = compile_pattern(&rule.pattern).map_err(|e| e.to_string());
        if let Err(error) = &compiled {
            tracing::warn!(
                chat_id = %rule.chat_id,
                rule_id = %rule.id,
                pattern = %rule.pattern,
                "Auto-reply pattern does not compile: {error}"
            );
        }
        self.compiled
            .lock()
            .insert(rule.id.clone(), compiled.clone());
        compiled
    }

    fn load_rules(&self, chat_id: &str) -> Result<Vec<AutoReplyRule>> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, pattern, template, created_at
                 FROM auto_reply_rules
                 WHERE chat_id = ?1
                 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![chat_id], |row| {
                let created_at: String = row.get(4)?;
                Ok(AutoReplyRule {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    pattern: row.get(2)?,
                    template: row.get(3)?,
                    created_at: parse_rfc3339(&created_at).map_err(sql_conversion_error)?,
                })
            })?;

            let mut rules = Vec::new();
            for row in rows {
                rules.push(row?);
            }
            Ok(rules)
        })
    }
}
