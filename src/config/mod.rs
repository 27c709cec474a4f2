pub mod schema;

pub use schema::{
    AgentConfig, Config, ContextConfig, MemoryConfig, RulesConfig, StreamConfig,
    MAX_CONTEXT_WINDOW,
};
