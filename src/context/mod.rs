//! Per-chat sliding window of recent messages.
//!
//! Each chat owns a FIFO buffer bounded by its effective window: the chat's
//! override when one is set, clamped to the process-wide maximum. Eviction
//! always drops the oldest entries.

use crate::channels::ChannelMessage;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A message retained in a chat's window.
pub type CachedMessage = ChannelMessage;

#[derive(Debug, Default)]
struct ChatBuffer {
    messages: VecDeque<CachedMessage>,
    window_override: Option<usize>,
}

#[derive(Debug)]
struct CacheState {
    max_window: usize,
    chats: HashMap<String, ChatBuffer>,
}

impl CacheState {
    fn effective_window(&self, buffer: Option<&ChatBuffer>) -> usize {
        buffer
            .and_then(|buffer| buffer.window_override)
            .map_or(self.max_window, |window| window.min(self.max_window))
    }
}

pub struct ContextCache {
    state: Mutex<CacheState>,
}

impl ContextCache {
    pub fn new(max_window: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                max_window: max_window.max(1),
                chats: HashMap::new(),
            }),
        }
    }

    /// Append a message to its chat. Messages without text or without an
    /// identified sender are ignored; returns whether the message was kept.
    pub fn add_message(&self, message: &ChannelMessage) -> bool {
        if message.content.trim().is_empty() || message.sender_id.trim().is_empty() {
            return false;
        }

        let mut state = self.state.lock();
        let max_window = state.max_window;
        let buffer = state.chats.entry(message.chat_id.clone()).or_default();
        let window = buffer
            .window_override
            .map_or(max_window, |window| window.min(max_window));

        buffer.messages.push_back(message.clone());
        while buffer.messages.len() > window {
            buffer.messages.pop_front();
        }
        true
    }

    /// The most recent `window` messages of a chat, oldest first. `None`
    /// means the chat's effective window; larger requests are clamped to it.
    pub fn get_messages(&self, chat_id: &str, window: Option<usize>) -> Vec<CachedMessage> {
        let state = self.state.lock();
        let Some(buffer) = state.chats.get(chat_id) else {
            return Vec::new();
        };
        let effective = state.effective_window(Some(buffer));
        let take = window.map_or(effective, |window| window.min(effective));
        let skip = buffer.messages.len().saturating_sub(take);
        buffer.messages.iter().skip(skip).cloned().collect()
    }

    /// Change the process-wide maximum, trimming every chat to the newest
    /// `new_max` entries.
    pub fn set_global_window(&self, new_max: usize) {
        let new_max = new_max.max(1);
        let mut state = self.state.lock();
        state.max_window = new_max;
        for buffer in state.chats.values_mut() {
            let window = buffer
                .window_override
                .map_or(new_max, |window| window.min(new_max));
            trim_front(&mut buffer.messages, window);
        }
        tracing::debug!(max_window = new_max, "Context window resized");
    }

    /// Set or clear a chat's window override. Returns the effective window.
    pub fn set_chat_window(&self, chat_id: &str, window: Option<usize>) -> usize {
        let mut state = self.state.lock();
        let max_window = state.max_window;
        let buffer = state.chats.entry(chat_id.to_string()).or_default();
        buffer.window_override = window.map(|window| window.max(1));
        let effective = buffer
            .window_override
            .map_or(max_window, |window| window.min(max_window));
        trim_front(&mut buffer.messages, effective);
        effective
    }

    pub fn effective_window(&self, chat_id: &str) -> usize {
        let state = self.state.lock();
        state.effective_window(state.chats.get(chat_id))
    }

    pub fn max_window(&self) -> usize {
        self.state.lock().max_window
    }

    pub fn len(&self, chat_id: &str) -> usize {
        self.state
            .lock()
            .chats
            .get(chat_id)
            .map_or(0, |buffer| buffer.messages.len())
    }
}

fn trim_front(messages: &mut VecDeque<CachedMessage>, window: usize) {
    let excess = messages.len().saturating_sub(window);
    messages.drain(..excess);
}
