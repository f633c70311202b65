//! Web search tool. Every search is logged to the store so the extraction
//! pipeline can mine it later.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use penny_store::{KnowledgeStore, SearchTrigger};

use super::{SearchOutput, Tool, ToolError, ToolOutput};

/// Transport-level search backend (Perplexity-style chat-with-citations
/// API). Split from the tool so tests can script responses.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Returns (answer text, source urls).
    async fn search(&self, query: &str) -> Result<(String, Vec<String>), ToolError>;
}

/// Perplexity API backend.
pub struct PerplexityBackend {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl PerplexityBackend {
    pub fn new(api_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct PerplexityResponse {
    choices: Vec<PerplexityChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct PerplexityChoice {
    message: PerplexityMessage,
}

#[derive(Deserialize)]
struct PerplexityMessage {
    content: String,
}

#[async_trait]
impl SearchBackend for PerplexityBackend {
    async fn search(&self, query: &str) -> Result<(String, Vec<String>), ToolError> {
        let body = serde_json::json!({
            "model": "sonar",
            "messages": [{ "role": "user", "content": query }],
        });
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::Failed {
                tool: "search",
                reason: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ToolError::Failed {
                tool: "search",
                reason: format!("HTTP {status}"),
            });
        }
        let parsed: PerplexityResponse = resp.json().await.map_err(|e| ToolError::Failed {
            tool: "search",
            reason: e.to_string(),
        })?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok((text, parsed.citations))
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

/// The `search` tool: run a query, log it, hand the text and sources back
/// to the agent loop.
pub struct SearchTool {
    backend: Arc<dyn SearchBackend>,
    store: Arc<KnowledgeStore>,
}

impl SearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>, store: Arc<KnowledgeStore>) -> Self {
        Self { backend, store }
    }

    /// Run a search on behalf of a background agent. The trigger tags the
    /// search log so extraction attributes it correctly, and an optional
    /// learn prompt links it to a /learn budget.
    pub async fn search_with_trigger(
        &self,
        query: &str,
        trigger: SearchTrigger,
        learn_prompt_id: Option<i64>,
    ) -> Result<SearchOutput, ToolError> {
        let (text, urls) = self.backend.search(query).await?;
        if let Err(e) = self
            .store
            .log_search(query, &text, trigger, learn_prompt_id)
        {
            error!("failed to log search: {e}");
        }
        info!(query, trigger = %trigger, "search completed");
        Ok(SearchOutput {
            text,
            urls,
            image_base64: None,
        })
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &'static str {
        "search"
    }

    fn description(&self) -> &'static str {
        "Search the web for current information. Use for anything you don't know."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: SearchArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
                tool: "search",
                reason: e.to_string(),
            })?;
        let output = self
            .search_with_trigger(&args.query, SearchTrigger::UserMessage, None)
            .await?;
        Ok(ToolOutput::Search(output))
    }
}
