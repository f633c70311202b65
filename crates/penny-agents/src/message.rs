//! Foreground message agent: one incoming message through an LLM
//! tool-calling loop, producing a reply.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use penny_core::responses;
use penny_llm::{ChatMessage, ChatRequest, LlmBackend, Role, ToolCall};
use penny_store::KnowledgeStore;

use crate::compose::build_messages;
use crate::prompts;
use crate::tools::{ToolExecutor, ToolOutput};

const MAX_XML_RETRIES: usize = penny_core::constants::MAX_XML_RETRIES;

/// Record of one tool invocation during a run.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: serde_json::Value,
}

/// The agent's reply to one message.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub answer: String,
    pub attachments: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Detects paired XML-like tags in content — a model that answered with
/// `<function=search>...</function>` instead of a structured tool call.
fn has_xml_tags(content: &str) -> bool {
    let Some(open) = content.find('<') else {
        return false;
    };
    let rest = &content[open..];
    let Some(name_end) = rest.find(|c: char| c == ' ' || c == '=' || c == '>') else {
        return false;
    };
    let name: String = rest[1..name_end]
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_alphabetic()) {
        return false;
    }
    rest.contains(&format!("</{name}>"))
}

/// Strip a user's profile name from a search query unless they typed it
/// themselves. Privacy rule: profile data never leaks to external search
/// APIs unsolicited.
fn redact_query(query: &str, name: &str) -> String {
    // Byte-level case folding is only sound for ASCII names; non-ASCII
    // profile names are left alone.
    let lower_name = name.to_ascii_lowercase();
    if lower_name.is_empty() || !name.is_ascii() {
        return query.to_string();
    }
    let mut out = String::with_capacity(query.len());
    let mut rest = query;
    while let Some(pos) = find_ascii_ci(rest, &lower_name) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + lower_name.len()..];
    }
    out.push_str(rest);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// ASCII-case-insensitive substring search. `needle` must already be ASCII
/// lowercase; a match is therefore always on char boundaries.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| {
        h[i..i + n.len()]
            .iter()
            .zip(n)
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
    })
}

pub struct MessageAgent {
    llm: Arc<dyn LlmBackend>,
    store: Arc<KnowledgeStore>,
    executor: ToolExecutor,
    max_steps: usize,
    vision_model: Option<String>,
    allow_repeat_tools: bool,
}

impl MessageAgent {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        store: Arc<KnowledgeStore>,
        executor: ToolExecutor,
        max_steps: usize,
        vision_model: Option<String>,
    ) -> Self {
        Self {
            llm,
            store,
            executor,
            max_steps,
            vision_model,
            allow_repeat_tools: false,
        }
    }

    /// Process one incoming user message and produce a reply.
    pub async fn handle(
        &self,
        sender: &str,
        content: &str,
        quoted_text: Option<&str>,
        images: &[String],
    ) -> AgentReply {
        let mut prompt = content.to_string();

        if !images.is_empty() {
            for caption in self.caption_images(images).await {
                prompt.push_str(&format!("\n\n[Attached image: {caption}]"));
            }
        }
        if let Some(quoted) = quoted_text {
            prompt = format!("(Replying to: \"{quoted}\")\n\n{prompt}");
        }

        // Redact the user's profile name from searches unless they typed it.
        let redact_name = match self.store.get_user_info(sender) {
            Ok(Some(info))
                if !content.to_lowercase().contains(&info.name.to_lowercase()) =>
            {
                Some(info.name)
            }
            _ => None,
        };

        self.run(&prompt, &[], redact_name.as_deref(), None).await
    }

    async fn caption_images(&self, images: &[String]) -> Vec<String> {
        let Some(vision_model) = &self.vision_model else {
            return Vec::new();
        };
        let mut captions = Vec::new();
        for image in images {
            let req = ChatRequest {
                model: Some(vision_model.clone()),
                messages: vec![ChatMessage {
                    role: Role::User,
                    content: prompts::VISION_AUTO_DESCRIBE_PROMPT.to_string(),
                    images: vec![image.clone()],
                }],
                ..Default::default()
            };
            match self.llm.chat(&req).await {
                Ok(resp) => captions.push(resp.content.trim().to_string()),
                Err(e) => warn!("image captioning failed: {e}"),
            }
        }
        captions
    }

    /// The tool loop. `redact_name` strips the user's profile name from
    /// search queries; `max_steps` overrides the agent default.
    pub async fn run(
        &self,
        prompt: &str,
        history: &[(Role, String)],
        redact_name: Option<&str>,
        max_steps: Option<usize>,
    ) -> AgentReply {
        let mut messages = build_messages(None, history, prompt);
        let tool_defs = self.executor.registry().definitions();
        let use_tools = !tool_defs.is_empty();

        let mut attachments: Vec<String> = Vec::new();
        let mut source_urls: Vec<String> = Vec::new();
        let mut called_tools: HashSet<String> = HashSet::new();
        let mut tool_call_records: Vec<ToolCallRecord> = Vec::new();

        let steps = max_steps.unwrap_or(self.max_steps);
        for step in 0..steps {
            debug!(step = step + 1, steps, "agent step");

            // Retry the model call when it emits XML markup instead of
            // structured tool calls. Does not consume an agentic step.
            let mut response = None;
            for xml_attempt in 0..MAX_XML_RETRIES {
                let req = ChatRequest {
                    model: None,
                    messages: messages.clone(),
                    tools: tool_defs.clone(),
                    format: None,
                };
                let resp = match self.llm.chat(&req).await {
                    Ok(r) => r,
                    Err(e) => {
                        error!("error calling LLM: {e}");
                        return AgentReply {
                            answer: responses::AGENT_MODEL_ERROR.to_string(),
                            attachments,
                            tool_calls: tool_call_records,
                        };
                    }
                };
                if resp.has_tool_calls() || !(use_tools && has_xml_tags(resp.content.trim())) {
                    response = Some(resp);
                    break;
                }
                warn!(
                    attempt = xml_attempt + 1,
                    max = MAX_XML_RETRIES,
                    "model emitted XML markup in content; retrying"
                );
                response = Some(resp);
            }
            let response = response.unwrap_or_default();

            if response.has_tool_calls() {
                info!(count = response.tool_calls.len(), "model requested tool calls");
                if !response.content.trim().is_empty() {
                    messages.push(ChatMessage::assistant(response.content.trim()));
                }

                // Partition into repeats (refused inline) and fresh calls.
                let mut to_execute: Vec<ToolCall> = Vec::new();
                for call in response.tool_calls {
                    if !self.allow_repeat_tools && called_tools.contains(&call.name) {
                        info!(tool = %call.name, "skipping repeat tool call");
                        messages.push(ChatMessage::tool(
                            "Tool already called. DO NOT search again. Write your response NOW.",
                        ));
                        continue;
                    }
                    called_tools.insert(call.name.clone());
                    tool_call_records.push(ToolCallRecord {
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                    to_execute.push(call);
                }

                // Execute this step's calls in parallel, each under the
                // executor's per-tool timeout.
                let futures = to_execute.iter().map(|call| {
                    let arguments = self.prepare_arguments(call, redact_name);
                    self.executor.execute(&call.name, arguments)
                });
                for result in join_all(futures).await {
                    let result_str = match result {
                        Ok(ToolOutput::Text(text)) => text,
                        Ok(ToolOutput::Search(search)) => {
                            let mut s = search.text;
                            if !search.urls.is_empty() {
                                source_urls.extend(search.urls.iter().cloned());
                                s.push_str(&format!("\n\nSources:\n{}", search.urls.join("\n")));
                            }
                            if let Some(image) = search.image_base64 {
                                attachments.push(image);
                            }
                            s.push_str(
                                "\n\nDO NOT search again. Write your response NOW using these results.",
                            );
                            s
                        }
                        Err(e) => format!("Error: {e}"),
                    };
                    messages.push(ChatMessage::tool(result_str));
                }
                continue;
            }

            // No tool calls — final answer.
            let content = response.content.trim().to_string();
            if content.is_empty() {
                error!("model returned empty content");
                return AgentReply {
                    answer: responses::AGENT_EMPTY_RESPONSE.to_string(),
                    attachments,
                    tool_calls: tool_call_records,
                };
            }

            let answer = if !source_urls.is_empty() && !content.contains("http") {
                format!("{content}\n\n{}", source_urls[0])
            } else {
                content
            };

            info!(chars = answer.len(), "got final answer");
            return AgentReply {
                answer,
                attachments,
                tool_calls: tool_call_records,
            };
        }

        warn!("max steps reached without final answer");
        AgentReply {
            answer: responses::AGENT_MAX_STEPS.to_string(),
            attachments,
            tool_calls: tool_call_records,
        }
    }

    fn prepare_arguments(&self, call: &ToolCall, redact_name: Option<&str>) -> serde_json::Value {
        let mut arguments = call.arguments.clone();
        if call.name == "search" {
            let query = arguments
                .get("query")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if let (Some(name), Some(query)) = (redact_name, query) {
                let redacted = redact_query(&query, name);
                if redacted != query {
                    debug!("redacted profile name from search query");
                    arguments["query"] = serde_json::Value::String(redacted);
                }
            }
        }
        arguments
    }
}
