//! OpenAI-compatible chat completions provider with SSE streaming.

use super::traits::{
    ChatMessage, ChatRequest, EventStream, GenerationEvent, Provider, StreamError, StreamResult,
};
use crate::tools::ToolSpec;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 10;

pub struct OpenAiCompatibleProvider {
    base_url: String,
    credential: Option<String>,
    model: String,
    temperature: f64,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: &str,
        credential: Option<&str>,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: credential
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            model: model.to_string(),
            temperature,
            client,
        })
    }

    fn chat_completions_url(&self) -> String {
        if self.base_url.ends_with("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }
}

#[derive(Debug, Serialize)]
struct StreamingRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

fn tool_payload(tools: &[ToolSpec]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

// ---------------------------------------------------------------
// Streaming support (SSE decoder)
// ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StreamChunkResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    /// Reasoning/thinking models stream via `reasoning_content` or `reasoning`.
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug)]
struct PendingTool {
    id: String,
    name: String,
    arguments: String,
}

/// Turns SSE lines into [`GenerationEvent`]s.
///
/// Tool-call deltas are keyed by their `index`; a new index closes the
/// previously active tool with `ToolInputEnd` followed by `ToolCall`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    active: Option<usize>,
    tools: BTreeMap<usize, PendingTool>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode one SSE line. Blank lines, comments and non-data fields yield
    /// nothing.
    pub fn push_line(&mut self, line: &str) -> StreamResult<Vec<GenerationEvent>> {
        let line = line.trim();
        if self.done || line.is_empty() || line.starts_with(':') {
            return Ok(Vec::new());
        }
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(Vec::new());
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(self.finish());
        }

        let chunk: StreamChunkResponse = serde_json::from_str(data)?;
        let mut events = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(events);
        };

        let reasoning = choice
            .delta
            .reasoning_content
            .or(choice.delta.reasoning)
            .filter(|text| !text.is_empty());
        if let Some(reasoning) = reasoning {
            events.push(GenerationEvent::ReasoningDelta(reasoning));
        }
        if let Some(content) = choice.delta.content.filter(|text| !text.is_empty()) {
            events.push(GenerationEvent::TextDelta(content));
        }

        for call in choice.delta.tool_calls {
            if self.active != Some(call.index) {
                self.close_active(&mut events);
                let name = call
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                let id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", call.index));
                events.push(GenerationEvent::ToolInputStart {
                    id: id.clone(),
                    name: name.clone(),
                });
                self.tools.insert(
                    call.index,
                    PendingTool {
                        id,
                        name,
                        arguments: String::new(),
                    },
                );
                self.active = Some(call.index);
            }

            let fragment = call
                .function
                .and_then(|f| f.arguments)
                .filter(|args| !args.is_empty());
            if let (Some(fragment), Some(tool)) = (fragment, self.tools.get_mut(&call.index)) {
                tool.arguments.push_str(&fragment);
                events.push(GenerationEvent::ToolInputDelta(fragment));
            }
        }

        match choice.finish_reason.as_deref() {
            Some("content_filter") => {
                self.close_active(&mut events);
                events.push(GenerationEvent::Abort);
                self.done = true;
            }
            Some(_) => self.close_active(&mut events),
            None => {}
        }

        Ok(events)
    }

    /// Flush any tool still streaming. Idempotent.
    pub fn finish(&mut self) -> Vec<GenerationEvent> {
        let mut events = Vec::new();
        if !self.done {
            self.close_active(&mut events);
            self.done = true;
        }
        events
    }

    fn close_active(&mut self, events: &mut Vec<GenerationEvent>) {
        if let Some(index) = self.active.take() {
            if let Some(tool) = self.tools.remove(&index) {
                events.push(GenerationEvent::ToolInputEnd);
                events.push(GenerationEvent::ToolCall {
                    id: tool.id,
                    name: tool.name,
                    arguments: tool.arguments,
                });
            }
        }
    }
}

/// Convert an SSE response body into generation events.
fn sse_response_to_events(response: reqwest::Response) -> EventStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<StreamResult<GenerationEvent>>(100);

    tokio::spawn(async move {
        let mut decoder = SseDecoder::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut bytes_stream = response.bytes_stream();

        while let Some(item) = bytes_stream.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(Err(StreamError::Http(e))).await;
                    return;
                }
            };
            pending.extend_from_slice(&bytes);

            // Only complete lines are decoded so multi-byte characters split
            // across chunks survive.
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = match String::from_utf8(raw) {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = tx
                            .send(Err(StreamError::InvalidSse(format!("Invalid UTF-8: {e}"))))
                            .await;
                        return;
                    }
                };

                match decoder.push_line(&line) {
                    Ok(events) => {
                        for event in events {
                            if tx.send(Ok(event)).await.is_err() {
                                return; // Receiver dropped
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
                if decoder.is_done() {
                    return;
                }
            }
        }

        if !pending.is_empty() {
            let line = String::from_utf8_lossy(&pending).into_owned();
            match decoder.push_line(&line) {
                Ok(events) => {
                    for event in events {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
        for event in decoder.finish() {
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }
    });

    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .boxed()
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    async fn stream_chat(&self, request: ChatRequest<'_>) -> anyhow::Result<EventStream> {
        let body = StreamingRequest {
            model: &self.model,
            messages: request.messages,
            temperature: self.temperature,
            stream: true,
            tools: tool_payload(request.tools),
        };

        let mut req_builder = self
            .client
            .post(self.chat_completions_url())
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(credential) = &self.credential {
            req_builder = req_builder.header("Authorization", format!("Bearer {credential}"));
        }

        let response = req_builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP error: {status}"));
            return Err(StreamError::Provider(format!("{status}: {error}")).into());
        }

        tracing::debug!(model = %self.model, "Generation stream opened");
        Ok(sse_response_to_events(response))
    }
}
