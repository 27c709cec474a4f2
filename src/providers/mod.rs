pub mod compatible;
pub mod traits;

pub use compatible::{OpenAiCompatibleProvider, SseDecoder};
pub use traits::{
    ChatMessage, ChatRequest, EventStream, GenerationEvent, Provider, StreamError, StreamResult,
};

use crate::config::Config;

/// Build the generation provider described by the config.
pub fn create_provider(config: &Config) -> anyhow::Result<Box<dyn Provider>> {
    if config.api_key.is_none() {
        tracing::warn!(
            api_url = %config.api_url,
            "No API key configured; requests are sent unauthenticated"
        );
    }
    Ok(Box::new(OpenAiCompatibleProvider::new(
        &config.api_url,
        config.api_key.as_deref(),
        &config.default_model,
        config.default_temperature,
    )?))
}
