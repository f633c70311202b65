//! Scripted test doubles shared by the agent unit tests.

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use penny_channels::{ChannelError, MessageChannel};
use penny_llm::{ChatRequest, ChatResponse, LlmBackend, LlmError, ToolCall};
use penny_store::MessageRow;

use crate::tools::search::SearchBackend;
use crate::tools::ToolError;

/// LLM double that replays a scripted queue of responses, then falls back
/// to a fixed text response.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<ChatResponse>>,
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
    chat_calls: AtomicUsize,
    fallback: Mutex<String>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            embeddings: Mutex::new(HashMap::new()),
            chat_calls: AtomicUsize::new(0),
            fallback: Mutex::new("ok".to_string()),
        })
    }

    pub fn with_text(self: Arc<Self>, text: &str) -> Arc<Self> {
        self.responses.lock().unwrap().push_back(ChatResponse {
            content: text.to_string(),
            ..Default::default()
        });
        self
    }

    /// Queue a structured-output response (serialized JSON content).
    pub fn with_json(self: Arc<Self>, value: serde_json::Value) -> Arc<Self> {
        let text = value.to_string();
        self.with_text(&text)
    }

    pub fn with_tool_call(self: Arc<Self>, name: &str, arguments: serde_json::Value) -> Arc<Self> {
        self.responses.lock().unwrap().push_back(ChatResponse {
            tool_calls: vec![ToolCall {
                name: name.to_string(),
                arguments,
            }],
            ..Default::default()
        });
        self
    }

    pub fn with_fallback(self: Arc<Self>, text: &str) -> Arc<Self> {
        *self.fallback.lock().unwrap() = text.to_string();
        self
    }

    /// Pin the embedding vector returned for an exact input text.
    pub fn with_embedding(self: Arc<Self>, text: &str, vec: Vec<f32>) -> Arc<Self> {
        self.embeddings.lock().unwrap().insert(text.to_string(), vec);
        self
    }

    pub fn chat_count(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Deterministic pseudo-embedding: unrelated texts land far apart, so
    /// the default is "not a duplicate" unless a test pins vectors.
    fn hashed_embedding(text: &str) -> Vec<f32> {
        let mut vec = Vec::with_capacity(8);
        let mut seed = text.to_string();
        for _ in 0..8 {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            seed.hash(&mut hasher);
            let h = hasher.finish();
            vec.push((h % 1000) as f32 / 1000.0 - 0.5);
            seed = h.to_string();
        }
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        vec.iter().map(|v| v / norm.max(1e-6)).collect()
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ChatResponse {
            content: self.fallback.lock().unwrap().clone(),
            ..Default::default()
        }))
    }

    async fn embed(&self, texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>, LlmError> {
        let pinned = self.embeddings.lock().unwrap();
        Ok(texts
            .iter()
            .map(|t| {
                pinned
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| ScriptedLlm::hashed_embedding(t))
            })
            .collect())
    }

    async fn generate_image(&self, _prompt: &str, _model: &str) -> Result<String, LlmError> {
        Err(LlmError::Unavailable("no image model in tests".into()))
    }
}

/// Search backend double returning fixed text and sources.
pub struct ScriptedSearchBackend {
    text: String,
    urls: Vec<String>,
    pub queries: Mutex<Vec<String>>,
}

impl ScriptedSearchBackend {
    pub fn new(text: &str, urls: &[&str]) -> Self {
        Self {
            text: text.to_string(),
            urls: urls.iter().map(|s| s.to_string()).collect(),
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SearchBackend for ScriptedSearchBackend {
    async fn search(&self, query: &str) -> Result<(String, Vec<String>), ToolError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok((self.text.clone(), self.urls.clone()))
    }
}

/// Channel double recording every outbound send and typing event.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, String)>>,
    typing: Mutex<Vec<bool>>,
    next_external_id: AtomicUsize,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
            next_external_id: AtomicUsize::new(1),
        })
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn typing_events(&self) -> Vec<bool> {
        self.typing.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    fn sender_id(&self) -> &str {
        "penny"
    }

    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
        _attachments: &[String],
        _quote: Option<&MessageRow>,
    ) -> Result<Option<String>, ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        let id = self.next_external_id.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("ext-{id}")))
    }

    async fn send_typing(&self, _recipient: &str, typing: bool) {
        self.typing.lock().unwrap().push(typing);
    }
}
