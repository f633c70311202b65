use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64-encoded images for vision models. Omitted from the wire when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Request to the LLM backend.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Model override; the client's configured model when `None`.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    /// JSON schema for structured output. The response content is expected
    /// to parse against it; callers fail soft when it doesn't.
    pub format: Option<serde_json::Value>,
}

/// Response from the LLM backend (non-streaming).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Common interface for LLM backends. One trait covers all model slots
/// (foreground, background, vision, embedding); callers pass a model
/// override on the request where a slot differs from the client default.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Send a chat request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Generate embeddings, one vector per input text.
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Generate an image from a prompt. Returns base64 PNG data.
    async fn generate_image(&self, prompt: &str, model: &str) -> Result<String, LlmError>;

    /// Convenience: single-prompt completion, optionally with a structured
    /// output schema.
    async fn generate(
        &self,
        prompt: &str,
        format: Option<serde_json::Value>,
    ) -> Result<ChatResponse, LlmError> {
        let req = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            format,
            ..Default::default()
        };
        self.chat(&req).await
    }
}
