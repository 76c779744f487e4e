//! Model provider adapters: one non-streaming `generate` call per agent turn.

pub mod anthropic;
pub mod fake;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use fake::{FakeProvider, ScriptedTurn};
pub use provider::{LlmError, LlmProvider, LlmResult};
pub use types::*;
