//! Model Gateway: the only component allowed to speak HTTP to an LLM
//! runtime. Everything else — Router, Executor, Heartbeat — goes through
//! the narrow `generate`/`chat`/`chat_streaming`/`embed` surface here.

pub mod chat;
pub mod client;

pub use chat::{ChatMessage, ChatOptions, ChatResponse, Role, TokenUsage};
pub use client::{LlmClient, LlmProvider, ModelSpec};
