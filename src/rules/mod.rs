mod store;

pub use store::RuleStore;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex, RegexBuilder};

/// Placeholder replaced by the sender's `@handle` (or display name).
pub const SENDER_PLACEHOLDER: &str = "$sender";

const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// A persisted, chat-scoped regex auto-reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoReplyRule {
    pub id: String,
    pub chat_id: String,
    pub pattern: String,
    pub template: String,
    pub created_at: DateTime<Utc>,
}

/// Which rules `remove_rule` deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSelector {
    Id(String),
    All,
}

impl RuleSelector {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => None,
            "all" => Some(Self::All),
            id => Some(Self::Id(id.to_string())),
        }
    }
}

/// A reply produced by one matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReply {
    pub rule_id: String,
    pub text: String,
}

/// A stored rule whose pattern could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDiagnostic {
    pub rule_id: String,
    pub pattern: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleEvaluation {
    pub replies: Vec<RuleReply>,
    pub diagnostics: Vec<RuleDiagnostic>,
}

#[derive(Debug, Clone)]
pub struct RuleListing {
    pub rule: AutoReplyRule,
    pub compile_error: Option<String>,
}

/// Compile a rule pattern the way evaluation does: case-insensitive.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
}

/// Expand a reply template.
///
/// `$N` becomes capture group N (empty when the group is missing or did not
/// participate), `$sender` becomes `sender`, `$$` is a literal `$`. Any other
/// `$` is kept as-is. Digits are read greedily, so `$12` is group 12.
pub fn expand_template(template: &str, captures: Option<&Captures<'_>>, sender: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            let group = after[..digits]
                .parse::<usize>()
                .ok()
                .and_then(|index| captures.and_then(|caps| caps.get(index)))
                .map_or("", |m| m.as_str());
            out.push_str(group);
            rest = &after[digits..];
            continue;
        }

        if let Some(tail) = after.strip_prefix(&SENDER_PLACEHOLDER[1..]) {
            out.push_str(sender);
            rest = tail;
            continue;
        }

        out.push('$');
        rest = after;
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_numbered_groups() {
        let re = compile_pattern(r"^remind (\w+) about (.+)$").unwrap();
        let caps = re.captures("Remind bob about lunch").unwrap();
        assert_eq!(
            expand_template("$1: don't forget $2", Some(&caps), "@alice"),
            "bob: don't forget lunch"
        );
    }

    #[test]
    fn missing_group_expands_to_empty_string() {
        let re = compile_pattern("^hi$").unwrap();
        let caps = re.captures("hi").unwrap();
        assert_eq!(expand_template("hello $1", Some(&caps), "@alice"), "hello ");
        assert_eq!(expand_template("hello $1", None, "@alice"), "hello ");
    }

    #[test]
    fn non_participating_group_is_empty() {
        let re = compile_pattern("^(a)?b$").unwrap();
        let caps = re.captures("b").unwrap();
        assert_eq!(expand_template("[$1]", Some(&caps), "x"), "[]");
    }

    #[test]
    fn sender_placeholder_and_literal_dollars() {
        assert_eq!(
            expand_template("hey $sender, that's $$5", None, "@alice"),
            "hey @alice, that's $5"
        );
        assert_eq!(expand_template("cost: $ or $x", None, "@a"), "cost: $ or $x");
        assert_eq!(expand_template("trailing $", None, "@a"), "trailing $");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let re = compile_pattern("^good morning$").unwrap();
        assert!(re.is_match("GOOD Morning"));
    }

    #[test]
    fn rule_selector_parse() {
        assert_eq!(RuleSelector::parse("all"), Some(RuleSelector::All));
        assert_eq!(
            RuleSelector::parse(" abc "),
            Some(RuleSelector::Id("abc".into()))
        );
        assert_eq!(RuleSelector::parse("  "), None);
    }
}
