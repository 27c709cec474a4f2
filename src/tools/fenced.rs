//! Legacy effect surface: fenced ```` ```exec ```` blocks in finished answers.

use super::dispatcher::{EffectContext, EffectResult, ToolEffectDispatcher};
use super::effects::EffectCall;

pub const EXEC_LABEL: &str = "exec";

/// Bodies of every ```` ```exec ```` block in `text`, in order.
///
/// An unterminated block runs to the end of the text.
pub fn extract_exec_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        match current.as_mut() {
            Some(body) => {
                if trimmed == "```" {
                    blocks.push(body.join("\n"));
                    current = None;
                } else {
                    body.push(line);
                }
            }
            None => {
                if let Some(label) = trimmed.strip_prefix("```") {
                    if label.trim() == EXEC_LABEL {
                        current = Some(Vec::new());
                    }
                }
            }
        }
    }
    if let Some(body) = current {
        blocks.push(body.join("\n"));
    }
    blocks
}

/// Chat text reporting one legacy block's outcome.
pub fn block_report(result: &EffectResult) -> String {
    match result {
        Ok(ack) => format!("✅ {ack}"),
        Err(e) => format!("⚠️ {e}"),
    }
}

/// Parse and execute every exec block in `answer`. Returns one result per
/// block.
pub async fn dispatch_exec_blocks(
    dispatcher: &ToolEffectDispatcher,
    ctx: &EffectContext,
    answer: &str,
) -> Vec<EffectResult> {
    let calls: Vec<_> = extract_exec_blocks(answer)
        .iter()
        .map(|body| EffectCall::from_payload(body))
        .collect();
    if calls.is_empty() {
        return Vec::new();
    }
    tracing::debug!(chat_id = %ctx.chat_id, blocks = calls.len(), "Dispatching exec blocks");
    dispatcher.dispatch_all(ctx, calls).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;

    #[test]
    fn extracts_only_exec_blocks() {
        let text = "Sure!\n```exec\n{\"kind\":\"remember\",\"message\":\"a\"}\n```\n\
                    ```json\n{\"ignored\":true}\n```\n\
                    ```exec\n{\"kind\":\"reply_after\",\n \"timeout\":5,\"message\":\"b\"}\n```";
        let blocks = extract_exec_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], r#"{"kind":"remember","message":"a"}"#);
        assert!(blocks[1].contains("\"timeout\":5"));
    }

    #[test]
    fn unterminated_block_runs_to_end() {
        let blocks = extract_exec_blocks("```exec\n{\"kind\":\"remember\"");
        assert_eq!(blocks, vec![r#"{"kind":"remember""#.to_string()]);
        assert!(extract_exec_blocks("no blocks here").is_empty());
    }

    #[test]
    fn report_names_effect_or_error() {
        let err: EffectResult = Err(AgentError::validation("{}", "unknown kind ''"));
        let text = block_report(&err);
        assert!(text.contains("unknown kind"));
        assert!(text.contains("{}"));
    }
}
