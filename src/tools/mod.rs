//! Chat effects the model can trigger, live as tool calls or from legacy
//! fenced blocks.

pub mod dispatcher;
pub mod effects;
pub mod fenced;
pub mod traits;

pub use dispatcher::{EffectAck, EffectContext, EffectResult, ToolEffectDispatcher};
pub use effects::{effect_specs, EffectCall};
pub use fenced::{block_report, dispatch_exec_blocks, extract_exec_blocks, EXEC_LABEL};
pub use traits::ToolSpec;
