pub mod client;
pub mod embeddings;
pub mod similarity;
pub mod types;

pub use client::OllamaClient;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, LlmBackend, LlmError, Role, ToolCall, ToolDefinition,
};
