//! Streams generation events into a single growing chat message.
//!
//! Every event rebuilds the full snapshot. Non-final snapshots pass a
//! throttle gate (enough growth AND enough time since the last delivery);
//! the final snapshot is always delivered exactly once.

use crate::config::StreamConfig;
use crate::providers::{EventStream, GenerationEvent, StreamResult};
use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reasoning text providers send when the real reasoning is withheld.
pub const REDACTED_REASONING: &str = "[REDACTED]";

/// Where snapshots go: usually an edit of a placeholder chat message.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, snapshot: &str, is_final: bool) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("generation stream failed: {0}")]
    Upstream(String),

    #[error("final delivery failed: {0:#}")]
    Delivery(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub min_growth_chars: usize,
    pub min_interval: Duration,
    pub show_reasoning: bool,
    pub placeholder: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for RenderOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            min_growth_chars: config.min_growth_chars,
            min_interval: Duration::from_millis(config.min_interval_ms),
            show_reasoning: config.show_reasoning,
            placeholder: config.placeholder.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub final_snapshot: String,
    pub answer: String,
    pub tool_calls: Vec<CompletedToolCall>,
    pub aborted: bool,
}

#[derive(Debug, Clone)]
struct ActiveTool {
    id: String,
    name: String,
}

#[derive(Debug, Default)]
struct StreamState {
    aborted: bool,
    reasoning: String,
    answer: String,
    active_tool: Option<ActiveTool>,
    tool_arguments: HashMap<String, String>,
    tool_calls: Vec<CompletedToolCall>,
}

impl StreamState {
    fn apply(&mut self, event: GenerationEvent) {
        match event {
            GenerationEvent::ReasoningDelta(text) => self.reasoning.push_str(&text),
            GenerationEvent::TextDelta(text) => self.answer.push_str(&text),
            GenerationEvent::ToolInputStart { id, name } => {
                self.tool_arguments.entry(id.clone()).or_default();
                self.active_tool = Some(ActiveTool { id, name });
            }
            GenerationEvent::ToolInputDelta(fragment) => {
                if let Some(tool) = &self.active_tool {
                    self.tool_arguments
                        .entry(tool.id.clone())
                        .or_default()
                        .push_str(&fragment);
                }
            }
            GenerationEvent::ToolInputEnd => self.active_tool = None,
            GenerationEvent::ToolCall {
                id,
                name,
                arguments,
            } => self.tool_calls.push(CompletedToolCall {
                id,
                name,
                arguments,
            }),
            GenerationEvent::Abort => self.aborted = true,
        }
    }

    fn snapshot(&self, options: &RenderOptions) -> String {
        let mut sections = Vec::with_capacity(3);

        let reasoning = self.reasoning.trim();
        if options.show_reasoning && !reasoning.is_empty() && reasoning != REDACTED_REASONING {
            let quoted: Vec<String> = reasoning
                .lines()
                .map(|line| {
                    if line.is_empty() {
                        ">".to_string()
                    } else {
                        format!("> {line}")
                    }
                })
                .collect();
            sections.push(quoted.join("\n"));
        }

        if !self.answer.is_empty() {
            sections.push(self.answer.clone());
        }

        if let Some(tool) = &self.active_tool {
            let arguments = self
                .tool_arguments
                .get(&tool.id)
                .map_or("", String::as_str);
            sections.push(format!("_{}_\n```json\n{}\n```", tool.name, arguments));
        }

        if sections.is_empty() {
            options.placeholder.clone()
        } else {
            sections.join("\n\n")
        }
    }
}

/// Throttle gate bookkeeping: the last delivery attempt.
struct Gate {
    last_chars: usize,
    last_at: Instant,
}

impl Gate {
    fn admits(&self, snapshot_chars: usize, now: Instant, options: &RenderOptions) -> bool {
        snapshot_chars.saturating_sub(self.last_chars) >= options.min_growth_chars
            && now.duration_since(self.last_at) >= options.min_interval
    }
}

pub struct StreamRenderer {
    options: RenderOptions,
}

impl StreamRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Consume `events` in order, pushing throttled snapshots to `sink`, then
    /// deliver the final snapshot. Stops reading at `Abort`.
    ///
    /// A stream error returns [`RenderError::Upstream`] without a final
    /// delivery.
    pub async fn render<S>(
        &self,
        mut events: S,
        sink: &dyn DeliverySink,
    ) -> Result<RenderOutcome, RenderError>
    where
        S: Stream<Item = StreamResult<GenerationEvent>> + Unpin + Send,
    {
        let mut state = StreamState::default();
        let mut gate = Gate {
            last_chars: 0,
            last_at: Instant::now(),
        };

        while let Some(item) = events.next().await {
            let event = item.map_err(|e| RenderError::Upstream(e.to_string()))?;
            state.apply(event);
            if state.aborted {
                tracing::debug!("Generation aborted; finalizing");
                break;
            }

            let snapshot = state.snapshot(&self.options);
            let chars = snapshot.chars().count();
            let now = Instant::now();
            if !gate.admits(chars, now, &self.options) {
                continue;
            }

            gate = Gate {
                last_chars: chars,
                last_at: now,
            };
            if let Err(e) = sink.deliver(&snapshot, false).await {
                tracing::warn!("Intermediate snapshot delivery failed: {e:#}");
            }
        }

        let final_snapshot = state.snapshot(&self.options);
        sink.deliver(&final_snapshot, true)
            .await
            .map_err(RenderError::Delivery)?;

        Ok(RenderOutcome {
            final_snapshot,
            answer: state.answer,
            tool_calls: state.tool_calls,
            aborted: state.aborted,
        })
    }
}

/// Inject a single `Abort` into `events` once `token` is cancelled.
pub fn abort_on_cancel(events: EventStream, token: CancellationToken) -> EventStream {
    stream::unfold(
        (events, token, false),
        |(mut events, token, finished)| async move {
            if finished {
                return None;
            }
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    Some((Ok(GenerationEvent::Abort), (events, token, true)))
                }
                item = events.next() => item.map(|item| (item, (events, token, false))),
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StreamError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        deliveries: Mutex<Vec<(String, bool, Instant)>>,
        fail_non_final: bool,
        fail_final: bool,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn deliver(&self, snapshot: &str, is_final: bool) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if (is_final && self.fail_final) || (!is_final && self.fail_non_final) {
                anyhow::bail!("edit rejected");
            }
            self.deliveries
                .lock()
                .push((snapshot.to_string(), is_final, Instant::now()));
            Ok(())
        }
    }

    fn timed(events: Vec<(u64, GenerationEvent)>) -> EventStream {
        stream::iter(events)
            .then(|(delay_ms, event)| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(event)
            })
            .boxed()
    }

    fn text(s: &str) -> GenerationEvent {
        GenerationEvent::TextDelta(s.to_string())
    }

    fn renderer() -> StreamRenderer {
        StreamRenderer::new(RenderOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stream_delivers_placeholder_once() {
        let sink = RecordingSink::default();
        let outcome = renderer().render(timed(vec![]), &sink).await.unwrap();
        let deliveries = sink.deliveries.lock();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "...");
        assert!(deliveries[0].1);
        assert_eq!(outcome.final_snapshot, "...");
    }

    #[tokio::test(start_paused = true)]
    async fn fast_stream_only_delivers_final() {
        let sink = RecordingSink::default();
        let chunk = "x".repeat(80);
        let events = (0..10).map(|_| (10, text(&chunk))).collect();
        let outcome = renderer().render(timed(events), &sink).await.unwrap();

        let deliveries = sink.deliveries.lock();
        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].1);
        assert_eq!(deliveries[0].0, chunk.repeat(10));
        assert_eq!(outcome.answer, chunk.repeat(10));
    }

    #[tokio::test(start_paused = true)]
    async fn non_final_deliveries_respect_gate() {
        let sink = RecordingSink::default();
        // Mix of small and large deltas at varied intervals.
        let events = vec![
            (7000, text(&"a".repeat(10))),
            (1000, text(&"b".repeat(60))),
            (1000, text(&"c".repeat(60))),
            (5000, text(&"d".repeat(5))),
            (9000, text(&"e".repeat(20))),
            (6000, text(&"f".repeat(49))),
            (100, text(&"g".repeat(1))),
            (6500, text(&"h".repeat(200))),
        ];
        let outcome = renderer().render(timed(events), &sink).await.unwrap();

        let deliveries = sink.deliveries.lock();
        let (finals, partials): (Vec<_>, Vec<_>) = deliveries.iter().partition(|d| d.1);
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].0, outcome.final_snapshot);
        assert!(!partials.is_empty());

        let mut previous_chars = 0;
        let mut previous_at: Option<Instant> = None;
        for (snapshot, _, at) in &partials {
            let chars = snapshot.chars().count();
            assert!(chars - previous_chars >= 50);
            if let Some(previous_at) = previous_at {
                assert!(at.duration_since(previous_at) >= Duration::from_millis(6000));
            }
            previous_chars = chars;
            previous_at = Some(*at);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_but_small_growth_is_held_back() {
        let sink = RecordingSink::default();
        let events = (0..5).map(|_| (10_000, text("tiny"))).collect();
        renderer().render(timed(events), &sink).await.unwrap();
        let deliveries = sink.deliveries.lock();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "tiny".repeat(5));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_consumption() {
        let sink = RecordingSink::default();
        let events = timed(vec![
            (0, text("kept")),
            (0, GenerationEvent::Abort),
            (0, text(" dropped")),
        ]);
        let outcome = renderer().render(events, &sink).await.unwrap();
        assert!(outcome.aborted);
        assert_eq!(outcome.final_snapshot, "kept");
        let deliveries = sink.deliveries.lock();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "kept");
    }

    #[tokio::test(start_paused = true)]
    async fn reasoning_is_quoted_only_when_enabled_and_not_redacted() {
        let events = || {
            timed(vec![
                (0, GenerationEvent::ReasoningDelta("step one\nstep two".into())),
                (0, text("answer")),
            ])
        };

        let shown = StreamRenderer::new(RenderOptions {
            show_reasoning: true,
            ..RenderOptions::default()
        });
        let sink = RecordingSink::default();
        let outcome = shown.render(events(), &sink).await.unwrap();
        assert_eq!(outcome.final_snapshot, "> step one\n> step two\n\nanswer");

        let sink = RecordingSink::default();
        let outcome = renderer().render(events(), &sink).await.unwrap();
        assert_eq!(outcome.final_snapshot, "answer");

        let sink = RecordingSink::default();
        let redacted = timed(vec![(
            0,
            GenerationEvent::ReasoningDelta(REDACTED_REASONING.into()),
        )]);
        let outcome = shown.render(redacted, &sink).await.unwrap();
        assert_eq!(outcome.final_snapshot, "...");
    }

    #[tokio::test(start_paused = true)]
    async fn active_tool_is_rendered_and_collected() {
        let sink = RecordingSink::default();
        let events = timed(vec![
            (0, text("Saving.")),
            (
                0,
                GenerationEvent::ToolInputStart {
                    id: "t1".into(),
                    name: "remember".into(),
                },
            ),
            (0, GenerationEvent::ToolInputDelta("{\"message\":".into())),
            (0, GenerationEvent::ToolInputDelta("\"tea\"}".into())),
        ]);
        let outcome = renderer().render(events, &sink).await.unwrap();
        assert_eq!(
            outcome.final_snapshot,
            "Saving.\n\n_remember_\n```json\n{\"message\":\"tea\"}\n```"
        );

        let sink = RecordingSink::default();
        let events = timed(vec![
            (
                0,
                GenerationEvent::ToolInputStart {
                    id: "t1".into(),
                    name: "remember".into(),
                },
            ),
            (0, GenerationEvent::ToolInputDelta("{}".into())),
            (0, GenerationEvent::ToolInputEnd),
            (
                0,
                GenerationEvent::ToolCall {
                    id: "t1".into(),
                    name: "remember".into(),
                    arguments: "{}".into(),
                },
            ),
        ]);
        let outcome = renderer().render(events, &sink).await.unwrap();
        assert_eq!(outcome.final_snapshot, "...");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].name, "remember");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_intermediate_delivery_is_not_fatal() {
        let sink = RecordingSink {
            fail_non_final: true,
            ..RecordingSink::default()
        };
        let events = timed(vec![
            (7000, text(&"a".repeat(60))),
            (7000, text(&"b".repeat(60))),
        ]);
        let outcome = renderer().render(events, &sink).await.unwrap();
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        let deliveries = sink.deliveries.lock();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, outcome.final_snapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_final_delivery_is_an_error() {
        let sink = RecordingSink {
            fail_final: true,
            ..RecordingSink::default()
        };
        let err = renderer()
            .render(timed(vec![(0, text("hi"))]), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Delivery(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_error_skips_final_delivery() {
        let sink = RecordingSink::default();
        let events = stream::iter(vec![
            Ok(text("partial")),
            Err(StreamError::Provider("boom".into())),
        ])
        .boxed();
        let err = renderer().render(events, &sink).await.unwrap_err();
        assert!(matches!(err, RenderError::Upstream(ref m) if m.contains("boom")));
        assert!(sink.deliveries.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_injects_abort() {
        let token = CancellationToken::new();
        let events = abort_on_cancel(
            timed(vec![(0, text("early")), (60_000, text(" late"))]),
            token.clone(),
        );
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let sink = RecordingSink::default();
        let outcome = renderer().render(events, &sink).await.unwrap();
        assert!(outcome.aborted);
        assert_eq!(outcome.final_snapshot, "early");
    }
}
