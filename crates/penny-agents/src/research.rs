//! Research agent: multi-iteration deep research on user-requested topics.
//!
//! Each cycle advances the oldest in-progress task by one iteration: run
//! the model with the search tool and the accumulated draft, extract
//! sources, rebuild the report, store the iteration. At the iteration cap
//! the final report goes to the task's thread.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use penny_channels::Outbound;
use penny_core::config::RuntimeConfig;
use penny_core::{constants, responses};
use penny_llm::{ChatMessage, ChatRequest, LlmBackend, Role};
use penny_scheduler::{Agent, AgentResult};
use penny_store::{
    KnowledgeStore, ResearchIterationRow, ResearchStatus, ResearchTaskRow,
};

use crate::message::MessageAgent;
use crate::prompts;

const RESEARCH_TRUNCATED: &str = "\n\n[report truncated]";

pub struct ResearchAgent {
    llm: Arc<dyn LlmBackend>,
    store: Arc<KnowledgeStore>,
    outbound: Outbound,
    runner: Arc<MessageAgent>,
    config: RuntimeConfig,
    focus_timeout_secs: i64,
}

#[async_trait]
impl Agent for ResearchAgent {
    fn name(&self) -> &'static str {
        "research"
    }

    /// Advance the oldest in-progress research task by one iteration.
    async fn execute(&self) -> AgentResult {
        self.check_focus_timeout()?;

        let Some(task) = self.store.get_oldest_in_progress_research_task()? else {
            return Ok(false);
        };
        info!(task_id = task.id, topic = %task.topic, "continuing research task");

        let iterations = self.store.get_research_iterations(task.id)?;
        let current = iterations.len() as i64;

        if current >= task.max_iterations {
            self.complete_research(&task, &iterations).await?;
            return Ok(true);
        }

        let history = Self::build_history(&task, &iterations);
        let prompt = if current == 0 {
            "Begin researching this topic."
        } else {
            prompts::RESEARCH_FOLLOWUP_PROMPT
        };
        let reply = self.runner.run(prompt, &history, None, None).await;

        if reply.answer.is_empty() || reply.answer == responses::AGENT_MODEL_ERROR {
            warn!(task_id = task.id, "research iteration returned no usable response");
            self.mark_failed(&task, "no response from model")?;
            return Ok(false);
        }

        let search_query = reply
            .tool_calls
            .iter()
            .find(|tc| tc.tool == "search")
            .and_then(|tc| tc.arguments.get("query").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Iteration {}", current + 1));

        let sources = Self::extract_sources(&reply.answer);
        let current_report = iterations.last().map(|it| it.findings.as_str());
        let report = self
            .build_report(&task.topic, &reply.answer, task.focus.as_deref(), current_report)
            .await;

        self.store.add_research_iteration(
            task.id,
            current + 1,
            &search_query,
            &report,
            &sources,
        )?;
        info!(
            task_id = task.id,
            iteration = current + 1,
            max = task.max_iterations,
            "completed research iteration"
        );
        Ok(true)
    }
}

impl ResearchAgent {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        store: Arc<KnowledgeStore>,
        outbound: Outbound,
        runner: Arc<MessageAgent>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            llm,
            store,
            outbound,
            runner,
            config,
            focus_timeout_secs: constants::RESEARCH_FOCUS_TIMEOUT_SECONDS,
        }
    }

    #[cfg(test)]
    fn with_focus_timeout(mut self, secs: i64) -> Self {
        self.focus_timeout_secs = secs;
        self
    }

    /// Auto-start awaiting_focus tasks whose wait has expired.
    fn check_focus_timeout(&self) -> Result<(), penny_store::StoreError> {
        let now = Utc::now();
        for task in self.store.get_research_tasks_awaiting_focus()? {
            let elapsed = (now - task.created_at).num_seconds();
            if elapsed >= self.focus_timeout_secs {
                self.store
                    .set_research_task_status(task.id, ResearchStatus::InProgress)?;
                info!(
                    task_id = task.id,
                    elapsed_secs = elapsed,
                    "research task auto-started after focus timeout"
                );
            }
        }
        Ok(())
    }

    fn build_history(
        task: &ResearchTaskRow,
        iterations: &[ResearchIterationRow],
    ) -> Vec<(Role, String)> {
        let mut context = format!("Research topic: {}", task.topic);
        if let Some(focus) = &task.focus {
            context.push_str(&format!("\nUser's research focus: {focus}"));
        }
        let queries: Vec<String> = iterations
            .iter()
            .filter(|it| !it.query.is_empty())
            .map(|it| format!("\"{}\"", it.query))
            .collect();
        if !queries.is_empty() {
            context.push_str(&format!("\nPrevious searches: {}", queries.join(", ")));
        }

        let mut history = vec![(Role::System, context)];
        if let Some(last) = iterations.last() {
            history.push((
                Role::Assistant,
                format!("Current report draft:\n{}", last.findings),
            ));
        }
        history
    }

    fn extract_sources(content: &str) -> Vec<String> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
            .map(|line| line.to_string())
            .collect()
    }

    /// Merge the new search results into the running report draft.
    async fn build_report(
        &self,
        topic: &str,
        raw_response: &str,
        focus: Option<&str>,
        current_report: Option<&str>,
    ) -> String {
        let mut user_content = format!("Research topic: {topic}");
        if let Some(focus) = focus {
            user_content.push_str(&format!("\nRequested report format: {focus}"));
        }
        if let Some(report) = current_report {
            user_content.push_str(&format!("\n\nExisting report draft:\n\n{report}"));
        }
        user_content.push_str(&format!("\n\nNew search results:\n\n{raw_response}"));

        let req = ChatRequest {
            messages: vec![
                ChatMessage::system(prompts::RESEARCH_REPORT_BUILD_PROMPT),
                ChatMessage::user(user_content),
            ],
            ..Default::default()
        };
        match self.llm.chat(&req).await {
            Ok(resp) if !resp.content.trim().is_empty() => resp.content.trim().to_string(),
            // Fall back to the raw response so the iteration is never lost.
            _ => raw_response.to_string(),
        }
    }

    async fn complete_research(
        &self,
        task: &ResearchTaskRow,
        iterations: &[ResearchIterationRow],
    ) -> Result<(), penny_store::StoreError> {
        let mut report = iterations
            .last()
            .map(|it| it.findings.clone())
            .unwrap_or_default();

        let mut all_sources: Vec<String> = iterations
            .iter()
            .flat_map(|it| it.parsed_sources())
            .collect();
        all_sources.sort();
        all_sources.dedup();
        if !all_sources.is_empty() {
            report.push_str("\n\n## sources\n");
            for source in &all_sources {
                report.push_str(source);
                report.push('\n');
            }
        }

        let max_length = self.config.research_output_max_length;
        if report.len() > max_length {
            let cut = max_length.saturating_sub(RESEARCH_TRUNCATED.len());
            let boundary = report
                .char_indices()
                .take_while(|(i, _)| *i <= cut)
                .last()
                .map(|(i, _)| i)
                .unwrap_or(0);
            report.truncate(boundary);
            report.push_str(RESEARCH_TRUNCATED);
        }

        // The thread id doubles as the recipient on both transports.
        let recipient = task.thread_id.clone();
        match self
            .outbound
            .send_response(&recipient, &report, None, &[], None)
            .await
        {
            Ok(Some(message_id)) => {
                self.store
                    .set_research_task_message_id(task.id, &message_id.to_string())?;
                self.store
                    .set_research_task_status(task.id, ResearchStatus::Completed)?;
                info!(task_id = task.id, "research task completed");
                self.store.activate_next_pending_research_task(&task.thread_id)?;
            }
            Ok(None) | Err(_) => {
                error!(task_id = task.id, "failed to deliver research report");
                self.mark_failed(task, "report delivery failed")?;
            }
        }
        Ok(())
    }

    fn mark_failed(&self, task: &ResearchTaskRow, reason: &str) -> Result<(), penny_store::StoreError> {
        self.store
            .set_research_task_status(task.id, ResearchStatus::Failed)?;
        error!(task_id = task.id, reason, "research task marked failed");
        self.store.activate_next_pending_research_task(&task.thread_id)?;
        Ok(())
    }
}
