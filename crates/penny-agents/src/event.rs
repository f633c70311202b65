//! Event agent: polls news for active follow subscriptions and materializes
//! fresh, deduplicated events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use penny_core::config::RuntimeConfig;
use penny_llm::embeddings::serialize_embedding;
use penny_llm::similarity::{
    check_relevance, find_duplicate, normalize_headline, DedupStrategy,
};
use penny_llm::{ChatMessage, ChatRequest, LlmBackend};
use penny_scheduler::cron::cron_due;
use penny_scheduler::{Agent, AgentResult};
use penny_store::{EventRow, FollowPromptRow, KnowledgeStore};

use crate::prompts;
use crate::schemas::{parse_structured, HeadlineTags};
use crate::tools::news::{NewsArticle, NewsClient};

pub struct EventAgent {
    llm: Arc<dyn LlmBackend>,
    store: Arc<KnowledgeStore>,
    news: Option<Arc<NewsClient>>,
    background_model: Option<String>,
    embedding_model: Option<String>,
    config: RuntimeConfig,
}

#[async_trait]
impl Agent for EventAgent {
    fn name(&self) -> &'static str {
        "event"
    }

    /// Poll news for the next due follow prompt.
    async fn execute(&self) -> AgentResult {
        let Some(news) = self.news.clone() else {
            return Ok(false);
        };
        let Some(prompt) = self.next_due_prompt()? else {
            return Ok(false);
        };

        let articles = self.fetch_articles(&news, &prompt).await;
        let scored = self.score_relevant(articles, &prompt).await;
        let deduped = self.deduplicate(scored, &prompt).await?;
        let capped = self.rank_and_cap(deduped);
        let created = self.create_events(capped, &prompt).await?;
        self.store.update_follow_prompt_last_polled(prompt.id)?;

        if created > 0 {
            info!(count = created, topic = %prompt.prompt_text, "event agent created events");
        }
        Ok(created > 0)
    }
}

impl EventAgent {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        store: Arc<KnowledgeStore>,
        news: Option<Arc<NewsClient>>,
        background_model: Option<String>,
        embedding_model: Option<String>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            llm,
            store,
            news,
            background_model,
            embedding_model,
            config,
        }
    }

    /// Walk active prompts stalest-first; take the first whose cron has
    /// fired and which has no events still waiting to be announced.
    fn next_due_prompt(&self) -> Result<Option<FollowPromptRow>, penny_store::StoreError> {
        let now = Utc::now();
        for prompt in self.store.get_active_follow_prompts_by_poll_priority()? {
            if !cron_due(
                &prompt.cron_expression,
                &prompt.user_timezone,
                prompt.last_polled_at,
                now,
            ) {
                continue;
            }
            let waiting = self.store.get_unnotified_events_for_prompt(prompt.id)?;
            if !waiting.is_empty() {
                debug!(
                    topic = %prompt.prompt_text,
                    count = waiting.len(),
                    "event agent: skipping prompt with unannounced events"
                );
                continue;
            }
            return Ok(Some(prompt));
        }
        Ok(None)
    }

    async fn fetch_articles(
        &self,
        news: &NewsClient,
        prompt: &FollowPromptRow,
    ) -> Vec<NewsArticle> {
        let from_date = Utc::now() - Duration::days(self.config.event_dedup_window_days);
        news.search(&prompt.parsed_query_terms(), Some(from_date)).await
    }

    async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        let model = self.embedding_model.as_deref()?;
        match self.llm.embed(&[text.to_string()], model).await {
            Ok(vecs) => vecs.into_iter().next(),
            Err(e) => {
                warn!("embedding call failed: {e}");
                None
            }
        }
    }

    // --- Relevance -----------------------------------------------------

    /// Score each article by title-embedding similarity to the topic, with
    /// an LLM tag-extraction fallback for headlines that don't embed close
    /// to a broad topic word.
    async fn score_relevant(
        &self,
        articles: Vec<NewsArticle>,
        prompt: &FollowPromptRow,
    ) -> Vec<(f64, NewsArticle)> {
        let Some(topic_vec) = self.embed_one(&prompt.prompt_text).await else {
            // No embedding model — pass everything through at full score.
            return articles.into_iter().map(|a| (1.0, a)).collect();
        };

        let threshold = self.config.event_relevance_threshold;
        let mut scored = Vec::new();
        for article in articles {
            match self.relevance_score(&article, &topic_vec, threshold).await {
                Some(score) => scored.push((score, article)),
                None => {
                    debug!(title = %article.title, "event agent: rejected irrelevant article");
                }
            }
        }
        scored
    }

    async fn relevance_score(
        &self,
        article: &NewsArticle,
        topic_vec: &[f32],
        threshold: f64,
    ) -> Option<f64> {
        let article_vec = self.embed_one(&article.title).await?;
        if let Some(score) = check_relevance(&article_vec, topic_vec, threshold) {
            return Some(score);
        }
        // Title missed — extract topic tags from the headline and retry.
        let tags_vec = self.extract_tag_embedding(&article.title).await?;
        check_relevance(&tags_vec, topic_vec, threshold)
    }

    async fn extract_tag_embedding(&self, headline: &str) -> Option<Vec<f32>> {
        let prompt = prompts::EVENT_TAG_EXTRACTION_PROMPT.replace("{headline}", headline);
        let req = ChatRequest {
            model: self.background_model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            format: Some(HeadlineTags::schema()),
            ..Default::default()
        };
        let resp = match self.llm.chat(&req).await {
            Ok(r) => r,
            Err(e) => {
                debug!("tag extraction failed: {e}");
                return None;
            }
        };
        let tags: HeadlineTags = parse_structured("headline_tags", &resp.content)?;
        if tags.tags.is_empty() {
            return None;
        }
        self.embed_one(&tags.tags.join(", ")).await
    }

    // --- Dedup ---------------------------------------------------------

    /// Three layers against the recent event window: exact URL, normalized
    /// headline, then semantic (token containment OR embedding similarity).
    async fn deduplicate(
        &self,
        scored: Vec<(f64, NewsArticle)>,
        prompt: &FollowPromptRow,
    ) -> Result<Vec<(f64, NewsArticle)>, penny_store::StoreError> {
        let recent = self
            .store
            .get_recent_events(&prompt.user, self.config.event_dedup_window_days)?;
        let mut survivors = Vec::new();

        for (score, article) in scored {
            if self.is_url_duplicate(&article, &recent) {
                continue;
            }
            if Self::is_headline_duplicate(&article, &recent) {
                continue;
            }
            if self.is_semantic_duplicate(&article, &recent).await {
                continue;
            }
            survivors.push((score, article));
        }
        Ok(survivors)
    }

    fn is_url_duplicate(&self, article: &NewsArticle, recent: &[EventRow]) -> bool {
        recent
            .iter()
            .any(|e| e.external_id.as_deref() == Some(article.url.as_str()))
    }

    fn is_headline_duplicate(article: &NewsArticle, recent: &[EventRow]) -> bool {
        let normalized = normalize_headline(&article.title);
        recent
            .iter()
            .any(|e| normalize_headline(&e.headline) == normalized)
    }

    async fn is_semantic_duplicate(&self, article: &NewsArticle, recent: &[EventRow]) -> bool {
        let article_vec = self.embed_one(&article.title).await;
        let items: Vec<(String, Option<Vec<f32>>)> = recent
            .iter()
            .map(|e| {
                (
                    e.headline.clone(),
                    e.embedding
                        .as_deref()
                        .map(penny_llm::embeddings::deserialize_embedding),
                )
            })
            .collect();
        find_duplicate(
            &article.title,
            article_vec.as_deref(),
            &items,
            DedupStrategy::TcrOrEmbedding,
            self.config.event_dedup_similarity_threshold,
            self.config.event_dedup_tcr_threshold,
        )
        .is_some()
    }

    // --- Rank, cap, persist --------------------------------------------

    fn rank_and_cap(&self, mut scored: Vec<(f64, NewsArticle)>) -> Vec<NewsArticle> {
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let cap = self.config.event_max_per_poll;
        if scored.len() > cap {
            debug!(total = scored.len(), cap, "event agent: capping articles");
        }
        scored.into_iter().take(cap).map(|(_, a)| a).collect()
    }

    async fn create_events(
        &self,
        articles: Vec<NewsArticle>,
        prompt: &FollowPromptRow,
    ) -> Result<usize, penny_store::StoreError> {
        let mut created = 0usize;
        for article in articles {
            let Some(event) = self.store.add_event(
                &prompt.user,
                &article.title,
                &article.description,
                article.published_at,
                Some(&article.url),
                Some(&article.url),
                Some(prompt.id),
            )?
            else {
                continue;
            };
            if let Some(vec) = self.embed_one(&article.title).await {
                self.store
                    .update_event_embedding(event.id, &serialize_embedding(&vec))?;
            }
            created += 1;
        }
        Ok(created)
    }
}
