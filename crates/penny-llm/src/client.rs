//! Ollama-compatible HTTP client with bounded retry.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::types::{ChatRequest, ChatResponse, LlmBackend, LlmError, ToolCall};

/// Client for an Ollama-style chat/embed API.
pub struct OllamaClient {
    api_url: String,
    model: String,
    http: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

#[derive(Deserialize)]
struct WireChatResponse {
    message: WireMessage,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct WireEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct WireGenerateResponse {
    #[serde(default)]
    image: Option<String>,
}

impl OllamaClient {
    pub fn new(api_url: &str, model: &str, max_retries: u32, retry_delay_secs: f64) -> Self {
        info!(url = %api_url, model = %model, "initialized LLM client");
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http: reqwest::Client::new(),
            max_retries: max_retries.max(1),
            retry_delay: Duration::from_secs_f64(retry_delay_secs),
        }
    }

    /// Run `op` up to `max_retries` times with exponential backoff between
    /// attempts. The last error wins.
    async fn with_retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LlmError>>,
    {
        let mut last_error = None;
        for attempt in 0..self.max_retries {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        "{label} error: {e}"
                    );
                    last_error = Some(e);
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(self.retry_delay * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| LlmError::Unavailable(label.to_string())))
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, LlmError> {
        let resp = self
            .http
            .post(format!("{}{}", self.api_url, path))
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl LlmBackend for OllamaClient {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let model = req.model.as_deref().unwrap_or(&self.model);

        let mut body = serde_json::json!({
            "model": model,
            "messages": req.messages,
            "stream": false,
        });
        if !req.tools.is_empty() {
            let tools: Vec<serde_json::Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }
        if let Some(format) = &req.format {
            body["format"] = format.clone();
        }

        let body = &body;
        let raw = self
            .with_retry("chat", move || self.post_json("/api/chat", body))
            .await?;

        let wire: WireChatResponse =
            serde_json::from_value(raw).map_err(|e| LlmError::Parse(e.to_string()))?;

        let tool_calls: Vec<ToolCall> = wire
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        if !tool_calls.is_empty() {
            debug!(count = tool_calls.len(), "model requested tool calls");
        }

        Ok(ChatResponse {
            content: wire.message.content,
            thinking: wire.thinking.or(wire.message.thinking),
            tool_calls,
        })
    }

    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "model": model, "input": texts });
        let body = &body;
        let raw = self
            .with_retry("embed", move || self.post_json("/api/embed", body))
            .await?;
        let wire: WireEmbedResponse =
            serde_json::from_value(raw).map_err(|e| LlmError::Parse(e.to_string()))?;
        if wire.embeddings.len() != texts.len() {
            return Err(LlmError::Parse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                wire.embeddings.len()
            )));
        }
        Ok(wire.embeddings)
    }

    async fn generate_image(&self, prompt: &str, model: &str) -> Result<String, LlmError> {
        let body = serde_json::json!({ "model": model, "prompt": prompt, "stream": false });
        let body = &body;
        let raw = self
            .with_retry("image generation", move || {
                self.post_json("/api/generate", body)
            })
            .await?;
        let wire: WireGenerateResponse =
            serde_json::from_value(raw).map_err(|e| LlmError::Parse(e.to_string()))?;
        wire.image
            .ok_or_else(|| LlmError::Parse("model did not return image data".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn wire_response_parses_tool_calls() {
        let raw = serde_json::json!({
            "message": {
                "content": "",
                "tool_calls": [
                    {"function": {"name": "search", "arguments": {"query": "weather"}}}
                ]
            }
        });
        let wire: WireChatResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(wire.message.tool_calls.len(), 1);
        assert_eq!(wire.message.tool_calls[0].function.name, "search");
    }

    #[test]
    fn chat_message_serializes_without_empty_images() {
        let msg = ChatMessage::user("hi");
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v.get("images").is_none());
        assert_eq!(v["role"], "user");
    }
}
