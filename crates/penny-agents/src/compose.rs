//! Shared LLM composition helpers: system prompt assembly and user-facing
//! message composition for proactive sends.

use std::sync::Arc;

use chrono::Utc;
use tracing::error;

use penny_llm::{ChatMessage, ChatRequest, LlmBackend, Role};

use crate::prompts;

/// Build the message list for a chat call: timestamp + identity (+ agent
/// prompt) as system, then history, then the user prompt.
pub fn build_messages(
    agent_prompt: Option<&str>,
    history: &[(Role, String)],
    prompt: &str,
) -> Vec<ChatMessage> {
    let now = Utc::now().format("%A, %B %d, %Y at %I:%M %p UTC");
    let mut system = format!("Current date and time: {now}\n\n{}", prompts::PENNY_IDENTITY);
    if let Some(extra) = agent_prompt {
        system.push_str("\n\n");
        system.push_str(extra);
    }

    let mut messages = vec![ChatMessage::system(system)];
    for (role, content) in history {
        messages.push(ChatMessage {
            role: *role,
            content: content.clone(),
            images: Vec::new(),
        });
    }
    messages.push(ChatMessage::user(prompt));
    messages
}

/// Composes user-facing messages with Penny's identity and tone, for
/// proactive sends that don't run the tool loop.
#[derive(Clone)]
pub struct Composer {
    llm: Arc<dyn LlmBackend>,
    model: Option<String>,
}

impl Composer {
    pub fn new(llm: Arc<dyn LlmBackend>, model: Option<String>) -> Self {
        Self { llm, model }
    }

    /// Returns the model's trimmed response, or `None` on failure (logged).
    pub async fn compose(&self, prompt: &str, history: &[(Role, String)]) -> Option<String> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: build_messages(None, history, prompt),
            ..Default::default()
        };
        match self.llm.chat(&req).await {
            Ok(resp) => {
                let text = resp.content.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                error!("failed to compose user-facing message: {e}");
                None
            }
        }
    }
}
