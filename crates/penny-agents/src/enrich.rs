//! Enrichment agent: adaptive background research driven by interest.
//!
//! Each cycle picks the single highest-priority entity across all users and
//! runs one search for it — a broad one while the entity is thin on facts,
//! a recent-developments one once it is well documented.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use tracing::{debug, info, warn};

use penny_core::config::RuntimeConfig;
use penny_llm::embeddings::{
    build_entity_embed_text, deserialize_embedding, find_similar, serialize_embedding,
};
use penny_llm::similarity::{check_relevance, normalize_fact, DedupStrategy};
use penny_llm::{ChatMessage, ChatRequest, LlmBackend};
use penny_scheduler::{Agent, AgentResult};
use penny_store::{
    EngagementRow, EngagementType, EngagementValence, EntityRow, FactRow, KnowledgeStore,
    SearchTrigger,
};

use crate::extraction::is_valid_entity_name;
use crate::prompts;
use crate::schemas::{parse_structured, DiscoveredEntities, DiscoveredEntity, ExtractedFacts};
use crate::tools::search::SearchTool;

struct ScoredEntity {
    entity: EntityRow,
    user: String,
    interest: f64,
    fact_count: usize,
    facts: Vec<FactRow>,
    priority: f64,
}

pub struct EnrichAgent {
    llm: Arc<dyn LlmBackend>,
    store: Arc<KnowledgeStore>,
    search: Option<Arc<SearchTool>>,
    background_model: Option<String>,
    embedding_model: Option<String>,
    config: RuntimeConfig,
    last_enrich_time: Mutex<Option<Instant>>,
}

#[async_trait]
impl Agent for EnrichAgent {
    fn name(&self) -> &'static str {
        "enrich"
    }

    async fn execute(&self) -> AgentResult {
        let Some(search) = self.search.clone() else {
            debug!("enrich: no search tool configured");
            return Ok(false);
        };
        if !self.interval_elapsed() {
            return Ok(false);
        }

        let Some(candidate) = self.select_candidate()? else {
            debug!("enrich: no candidates to research");
            return Ok(false);
        };

        let did_work = self.research_entity(candidate, &search).await?;
        if did_work {
            self.mark_enrichment_done();
        }
        Ok(did_work)
    }
}

impl EnrichAgent {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        store: Arc<KnowledgeStore>,
        search: Option<Arc<SearchTool>>,
        background_model: Option<String>,
        embedding_model: Option<String>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            llm,
            store,
            search,
            background_model,
            embedding_model,
            config,
            last_enrich_time: Mutex::new(None),
        }
    }

    /// Fixed global interval between enrichment searches.
    fn interval_elapsed(&self) -> bool {
        let last = self.last_enrich_time.lock().unwrap_or_else(|p| p.into_inner());
        last.map_or(true, |t| {
            t.elapsed().as_secs_f64() >= self.config.enrichment_interval_secs
        })
    }

    fn mark_enrichment_done(&self) {
        *self.last_enrich_time.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
        info!(
            next_in_secs = self.config.enrichment_interval_secs,
            "enrichment done"
        );
    }

    // --- Candidate scoring ---------------------------------------------

    fn select_candidate(&self) -> Result<Option<ScoredEntity>, penny_store::StoreError> {
        let users = self.store.get_all_senders()?;
        let now = Utc::now();
        let mut best: Option<ScoredEntity> = None;

        for user in users {
            let entities = self.store.get_user_entities(&user)?;
            if entities.is_empty() {
                continue;
            }
            let engagements = self.store.get_user_engagements(&user)?;

            for entity in entities {
                if !self.enrichment_eligible(&entity, now) {
                    continue;
                }
                let Some(scored) = self.score_entity(entity, &engagements, &user)? else {
                    continue;
                };
                match &best {
                    Some(current) if current.priority >= scored.priority => {}
                    _ => best = Some(scored),
                }
            }
        }
        Ok(best)
    }

    fn enrichment_eligible(&self, entity: &EntityRow, now: chrono::DateTime<Utc>) -> bool {
        let Some(last) = entity.last_enriched_at else {
            return true;
        };
        let elapsed = (now - last).num_seconds() as f64;
        if elapsed < self.config.enrichment_entity_cooldown_secs {
            debug!(
                entity = %entity.name,
                elapsed_secs = elapsed,
                "enrich: skipping entity in cooldown"
            );
            return false;
        }
        true
    }

    fn score_entity(
        &self,
        entity: EntityRow,
        engagements: &[EngagementRow],
        user: &str,
    ) -> Result<Option<ScoredEntity>, penny_store::StoreError> {
        let entity_engagements: Vec<EngagementRow> = engagements
            .iter()
            .filter(|e| e.entity_id == Some(entity.id))
            .cloned()
            .collect();
        let interest = crate::interest::compute_interest_score(
            &entity_engagements,
            self.config.interest_score_half_life_days,
            Utc::now(),
        );
        if interest < self.config.enrichment_min_interest_score {
            return Ok(None);
        }

        let facts = self.store.get_entity_facts(entity.id)?;

        // Don't pile on while the notification agent still has a batch of
        // unannounced facts for this entity.
        if facts.iter().any(|f| f.notified_at.is_none()) {
            debug!(entity = %entity.name, "enrich: skipping entity with unannounced facts");
            return Ok(None);
        }

        // Log-diminishing returns: high-interest entities stay on top but
        // gradually yield as facts accumulate, allowing rotation.
        let fact_count = facts.len();
        let priority = interest / ((fact_count as f64) + 2.0).log2();

        Ok(Some(ScoredEntity {
            entity,
            user: user.to_string(),
            interest,
            fact_count,
            facts,
            priority,
        }))
    }

    // --- Research ------------------------------------------------------

    async fn research_entity(&self, candidate: ScoredEntity, search: &SearchTool) -> AgentResult {
        let entity = &candidate.entity;
        let is_enrichment = candidate.fact_count < self.config.enrichment_fact_threshold;
        info!(
            mode = if is_enrichment { "enrichment" } else { "briefing" },
            entity = %entity.name,
            user = %candidate.user,
            interest = candidate.interest,
            facts = candidate.fact_count,
            priority = candidate.priority,
            "enrich: researching entity"
        );

        let query = self.build_query(entity, is_enrichment, &candidate.facts);
        let search_text = match search
            .search_with_trigger(&query, SearchTrigger::PennyEnrichment, None)
            .await
        {
            Ok(result) => result.text,
            Err(e) => {
                warn!("enrich search failed: {e}");
                return Ok(false);
            }
        };

        let new_facts = self
            .extract_and_dedup_facts(entity, &candidate.facts, &search_text)
            .await?;
        info!(
            count = new_facts.len(),
            entity = %entity.name,
            "enrich: extracted new facts"
        );

        let stored = self.store_new_facts(entity, &new_facts).await?;
        if stored > 0 && self.embedding_model.is_some() {
            self.update_entity_embedding(entity).await?;
        }

        if self.embedding_model.is_some() {
            let discovered = self
                .discover_related_entities(entity, &candidate.user, &search_text)
                .await?;
            if discovered > 0 {
                info!(count = discovered, entity = %entity.name, "enrich: discovered related entities");
            }
        }

        self.store.update_last_enriched_at(entity.id)?;
        Ok(true)
    }

    /// Enrichment asks a broad question seeded with what we already know so
    /// the search focuses on novelty; briefing anchors on the current year.
    fn build_query(&self, entity: &EntityRow, is_enrichment: bool, facts: &[FactRow]) -> String {
        let label = match &entity.tagline {
            Some(t) if !t.is_empty() => format!("{} ({t})", entity.name),
            _ => entity.name.clone(),
        };
        if is_enrichment {
            if facts.is_empty() {
                return label;
            }
            let known: Vec<String> = facts.iter().map(|f| format!("- {}", f.content)).collect();
            return format!(
                "Tell me more about {label}. I already know:\n{}\n\nWhat else is important to know?",
                known.join("\n")
            );
        }
        format!("{label} latest news updates {}", Utc::now().year())
    }

    async fn generate_structured<T: serde::de::DeserializeOwned>(
        &self,
        label: &str,
        prompt: String,
        schema: serde_json::Value,
    ) -> Option<T> {
        let req = ChatRequest {
            model: self.background_model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            format: Some(schema),
            ..Default::default()
        };
        match self.llm.chat(&req).await {
            Ok(resp) => parse_structured(label, &resp.content),
            Err(e) => {
                warn!(call = label, "structured LLM call failed: {e}");
                None
            }
        }
    }

    async fn embed(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        let model = self.embedding_model.as_deref()?;
        match self.llm.embed(texts, model).await {
            Ok(vecs) => Some(vecs),
            Err(e) => {
                warn!("embedding call failed: {e}");
                None
            }
        }
    }

    async fn extract_and_dedup_facts(
        &self,
        entity: &EntityRow,
        existing: &[FactRow],
        search_text: &str,
    ) -> Result<Vec<String>, penny_store::StoreError> {
        let label = match &entity.tagline {
            Some(t) if !t.is_empty() => format!("{} ({t})", entity.name),
            _ => entity.name.clone(),
        };
        let mut prompt = format!(
            "{}\n\nEntity: {label}\n\nContent:\n{search_text}",
            prompts::ENTITY_FACT_EXTRACTION_PROMPT
        );
        if !existing.is_empty() {
            prompt.push_str("\n\nAlready known facts (return only NEW facts not listed here):\n");
            for fact in existing {
                prompt.push_str(&format!("- {}\n", fact.content));
            }
        }

        let candidates = self
            .generate_structured::<ExtractedFacts>("extract_facts", prompt, ExtractedFacts::schema())
            .await
            .map(|e| e.facts)
            .unwrap_or_default();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Fast pass: normalized string match against existing rows.
        let existing_normalized: std::collections::HashSet<String> =
            existing.iter().map(|f| normalize_fact(&f.content)).collect();
        let mut seen = existing_normalized;
        let mut new_facts: Vec<String> = Vec::new();
        for fact in candidates {
            let fact = fact.trim().to_string();
            if fact.is_empty() {
                continue;
            }
            let normalized = normalize_fact(&fact);
            if seen.contains(&normalized) {
                continue;
            }
            seen.insert(normalized);
            new_facts.push(fact);
        }
        if new_facts.is_empty() || self.embedding_model.is_none() {
            return Ok(new_facts);
        }

        // Slow pass: embedding similarity (paraphrase detection).
        let existing_with_embeddings: Vec<(i64, Vec<f32>)> = existing
            .iter()
            .filter_map(|f| f.embedding.as_deref().map(|b| (f.id, deserialize_embedding(b))))
            .collect();
        if existing_with_embeddings.is_empty() {
            return Ok(new_facts);
        }
        let Some(vecs) = self.embed(&new_facts).await else {
            return Ok(new_facts);
        };
        let threshold = self.config.fact_dedup_similarity_threshold;
        Ok(new_facts
            .into_iter()
            .zip(vecs)
            .filter(|(fact, vec)| {
                let matched = !find_similar(vec, &existing_with_embeddings, 1, threshold).is_empty();
                if matched {
                    debug!(fact = %fact, "enrich: duplicate fact confirmed existing row");
                }
                !matched
            })
            .map(|(fact, _)| fact)
            .collect())
    }

    async fn store_new_facts(
        &self,
        entity: &EntityRow,
        new_facts: &[String],
    ) -> Result<usize, penny_store::StoreError> {
        if new_facts.is_empty() {
            return Ok(0);
        }
        let embeddings = self.embed(new_facts).await;
        for (i, fact) in new_facts.iter().enumerate() {
            let embedding = embeddings
                .as_ref()
                .and_then(|vecs| vecs.get(i))
                .map(|v| serialize_embedding(v));
            self.store
                .add_fact(entity.id, fact, None, None, None, embedding.as_deref())?;
            info!(entity = %entity.name, fact = %fact, "enrich: stored fact");
        }
        Ok(new_facts.len())
    }

    async fn update_entity_embedding(
        &self,
        entity: &EntityRow,
    ) -> Result<(), penny_store::StoreError> {
        let facts = self.store.get_entity_facts(entity.id)?;
        let fact_texts: Vec<String> = facts.into_iter().map(|f| f.content).collect();
        let text = build_entity_embed_text(&entity.name, &fact_texts, entity.tagline.as_deref());
        if let Some(vecs) = self.embed(&[text]).await {
            if let Some(vec) = vecs.first() {
                self.store
                    .update_entity_embedding(entity.id, &serialize_embedding(vec))?;
                debug!(entity = %entity.name, "enrich: regenerated entity embedding");
            }
        }
        Ok(())
    }

    // --- Related entity discovery --------------------------------------

    async fn discover_related_entities(
        &self,
        entity: &EntityRow,
        user: &str,
        search_text: &str,
    ) -> Result<usize, penny_store::StoreError> {
        // Reload the embedding; it may have been regenerated above.
        let Some(enriching_vec) = self
            .store
            .get_entity(entity.id)?
            .and_then(|e| e.embedding)
            .map(|b| deserialize_embedding(&b))
        else {
            return Ok(0);
        };

        let mut existing_entities = self.store.get_user_entities(user)?;
        let candidates = self
            .identify_entity_candidates(&entity.name, &existing_entities, search_text)
            .await;
        if candidates.is_empty() {
            return Ok(0);
        }

        // Score each candidate by similarity to the enriching entity.
        let mut scored: Vec<(DiscoveredEntity, f64, Vec<f32>)> = Vec::new();
        for mut candidate in candidates {
            candidate.name = candidate.name.trim().to_lowercase();
            if !is_valid_entity_name(&candidate.name)
                || existing_entities.iter().any(|e| e.name == candidate.name)
            {
                continue;
            }
            candidate.tagline = clean_tagline(&candidate.tagline).unwrap_or_default();

            let Some(vecs) = self.embed(std::slice::from_ref(&candidate.name)).await else {
                continue;
            };
            let Some(candidate_vec) = vecs.into_iter().next() else {
                continue;
            };
            let threshold = self.config.enrichment_discovery_similarity_threshold;
            match check_relevance(&candidate_vec, &enriching_vec, threshold) {
                Some(score) => {
                    info!(name = %candidate.name, score, "discovery: accepted candidate");
                    scored.push((candidate, score, candidate_vec));
                }
                None => {
                    info!(name = %candidate.name, "discovery: rejected candidate below threshold");
                }
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let budget = self.config.enrichment_max_new_entities;
        let mut created = 0usize;
        for (candidate, relevance, candidate_vec) in scored {
            if created >= budget {
                break;
            }
            if self.is_discovery_duplicate(&candidate.name, &candidate_vec, &existing_entities) {
                continue;
            }
            if let Some(new_entity) = self
                .create_discovered_entity(&candidate, relevance, user, search_text)
                .await?
            {
                existing_entities.push(new_entity);
                created += 1;
            }
        }
        Ok(created)
    }

    async fn identify_entity_candidates(
        &self,
        entity_name: &str,
        existing: &[EntityRow],
        search_text: &str,
    ) -> Vec<DiscoveredEntity> {
        let known: Vec<String> = existing.iter().map(|e| format!("- {}", e.name)).collect();
        let prompt = format!(
            "{}\n\nContent:\n{search_text}\n\nKnown entities (do NOT return these):\n{}",
            prompts::ENRICHMENT_ENTITY_DISCOVERY_PROMPT.replace("{entity}", entity_name),
            known.join("\n")
        );
        self.generate_structured::<DiscoveredEntities>(
            "discover_entities",
            prompt,
            DiscoveredEntities::schema(),
        )
        .await
        .map(|d| d.entities)
        .unwrap_or_default()
    }

    fn is_discovery_duplicate(
        &self,
        name: &str,
        candidate_vec: &[f32],
        existing: &[EntityRow],
    ) -> bool {
        let items: Vec<(String, Option<Vec<f32>>)> = existing
            .iter()
            .map(|e| {
                (
                    e.name.clone(),
                    e.embedding.as_deref().map(deserialize_embedding),
                )
            })
            .collect();
        let matched = penny_llm::similarity::find_duplicate(
            name,
            Some(candidate_vec),
            &items,
            DedupStrategy::EmbeddingOnly,
            self.config.entity_dedup_embedding_threshold,
            0.0,
        );
        if let Some(idx) = matched {
            info!(name, duplicate_of = %existing[idx].name, "discovery: duplicate entity");
            return true;
        }
        false
    }

    async fn create_discovered_entity(
        &self,
        candidate: &DiscoveredEntity,
        relevance: f64,
        user: &str,
        search_text: &str,
    ) -> Result<Option<EntityRow>, penny_store::StoreError> {
        let label = if candidate.tagline.is_empty() {
            candidate.name.clone()
        } else {
            format!("{} ({})", candidate.name, candidate.tagline)
        };
        let prompt = format!(
            "{}\n\nEntity: {label}\n\nContent:\n{search_text}",
            prompts::ENTITY_FACT_EXTRACTION_PROMPT
        );
        let facts = self
            .generate_structured::<ExtractedFacts>("extract_facts", prompt, ExtractedFacts::schema())
            .await
            .map(|e| e.facts)
            .unwrap_or_default();
        if facts.is_empty() {
            info!(name = %candidate.name, "discovery: skipping candidate with no facts");
            return Ok(None);
        }

        let entity = self.store.get_or_create_entity(user, &candidate.name)?;
        if !candidate.tagline.is_empty() {
            self.store.update_entity_tagline(entity.id, &candidate.tagline)?;
        }

        self.store_new_facts(&entity, &facts).await?;
        self.update_entity_embedding(&entity).await?;

        // The discovery engagement seeds this entity's enrichment priority.
        self.store.add_engagement(
            user,
            Some(entity.id),
            EngagementType::SearchDiscovery,
            EngagementValence::Positive,
            relevance,
            None,
        )?;
        info!(name = %candidate.name, relevance, facts = facts.len(), "discovery: created entity");
        Ok(Some(entity))
    }
}

fn clean_tagline(raw: &str) -> Option<String> {
    let cleaned = raw.trim().to_lowercase();
    let cleaned = cleaned.trim_end_matches('.').to_string();
    if cleaned.is_empty() || cleaned.split_whitespace().count() > penny_core::constants::MAX_TAGLINE_WORDS
    {
        return None;
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedLlm, ScriptedSearchBackend};
    use penny_store::MessageDirection;

    fn seed_entity_with_facts(
        store: &KnowledgeStore,
        user: &str,
        name: &str,
        fact_count: usize,
        engagement_strength: f64,
    ) -> EntityRow {
        let entity = store.get_or_create_entity(user, name).unwrap();
        for i in 0..fact_count {
            let id = store
                .add_fact(entity.id, &format!("fact {i} about {name}"), None, None, None, None)
                .unwrap();
            store.mark_facts_notified(&[id]).unwrap();
        }
        if engagement_strength > 0.0 {
            store
                .add_engagement(
                    user,
                    Some(entity.id),
                    EngagementType::ExplicitStatement,
                    EngagementValence::Positive,
                    engagement_strength,
                    None,
                )
                .unwrap();
        }
        entity
    }

    fn agent(
        llm: Arc<ScriptedLlm>,
        store: Arc<KnowledgeStore>,
        search: Option<Arc<SearchTool>>,
        embedding: bool,
    ) -> EnrichAgent {
        EnrichAgent::new(
            llm,
            store,
            search,
            None,
            embedding.then(|| "embedder".to_string()),
            RuntimeConfig::default(),
        )
    }

    #[test]
    fn priority_prefers_interest_over_fact_count() {
        // A: 4 facts, interest 1.0 → 1.0/log2(6) ≈ 0.39
        // B: 1 fact, interest 0.5 → 0.5/log2(3) ≈ 0.32
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(MessageDirection::Incoming, "u", "hello world message", None, None, false)
            .unwrap();
        seed_entity_with_facts(&store, "u", "entity a", 4, 1.0);
        seed_entity_with_facts(&store, "u", "entity b", 1, 0.5);

        let llm = ScriptedLlm::new();
        let agent = agent(llm, Arc::clone(&store), None, false);
        let candidate = agent.select_candidate().unwrap().unwrap();
        assert_eq!(candidate.entity.name, "entity a");
        assert!((candidate.priority - 1.0 / 6.0f64.log2()).abs() < 0.05);
    }

    #[test]
    fn unannounced_facts_block_selection() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(MessageDirection::Incoming, "u", "hello world message", None, None, false)
            .unwrap();
        let entity = seed_entity_with_facts(&store, "u", "entity a", 2, 1.0);
        // One fresh, un-notified fact.
        store
            .add_fact(entity.id, "brand new fact", None, None, None, None)
            .unwrap();

        let llm = ScriptedLlm::new();
        let agent = agent(llm, Arc::clone(&store), None, false);
        assert!(agent.select_candidate().unwrap().is_none());
    }

    #[test]
    fn interest_below_minimum_is_skipped() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(MessageDirection::Incoming, "u", "hello world message", None, None, false)
            .unwrap();
        seed_entity_with_facts(&store, "u", "entity a", 2, 0.0);

        let llm = ScriptedLlm::new();
        let agent = agent(llm, Arc::clone(&store), None, false);
        assert!(agent.select_candidate().unwrap().is_none());
    }

    #[tokio::test]
    async fn research_stores_facts_and_updates_timestamps() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(MessageDirection::Incoming, "u", "hello world message", None, None, false)
            .unwrap();
        let entity = seed_entity_with_facts(&store, "u", "kef ls50 meta", 1, 1.0);

        let backend = Arc::new(ScriptedSearchBackend::new(
            "The LS50 Meta uses metamaterial absorption technology.",
            &[],
        ));
        let search = Arc::new(SearchTool::new(backend.clone(), Arc::clone(&store)));

        let llm = ScriptedLlm::new()
            // fact extraction from search text
            .with_json(serde_json::json!({ "facts": ["Uses metamaterial absorption technology"] }))
            // related entity discovery: nothing
            .with_json(serde_json::json!({ "entities": [] }));
        let agent = agent(llm, Arc::clone(&store), Some(search), true);

        let did_work = agent.execute().await.unwrap();
        assert!(did_work);

        let facts = store.get_entity_facts(entity.id).unwrap();
        assert_eq!(facts.len(), 2);
        let refreshed = store.get_entity(entity.id).unwrap().unwrap();
        assert!(refreshed.last_enriched_at.is_some());
        assert!(refreshed.embedding.is_some(), "embedding regenerated");

        // The search was tagged as enrichment for the extraction pipeline.
        let logs = store.get_unextracted_search_logs(10).unwrap();
        assert_eq!(logs[0].trigger, SearchTrigger::PennyEnrichment);
        assert!(backend.queries.lock().unwrap()[0].contains("I already know"));
    }

    #[tokio::test]
    async fn briefing_mode_uses_year_anchor() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(MessageDirection::Incoming, "u", "hello world message", None, None, false)
            .unwrap();
        // Above the fact threshold → briefing.
        seed_entity_with_facts(&store, "u", "genesis", 10, 2.0);

        let backend = Arc::new(ScriptedSearchBackend::new("nothing new", &[]));
        let search = Arc::new(SearchTool::new(backend.clone(), Arc::clone(&store)));
        let llm = ScriptedLlm::new().with_json(serde_json::json!({ "facts": [] }));
        let agent = agent(llm, Arc::clone(&store), Some(search), false);

        agent.execute().await.unwrap();

        let query = backend.queries.lock().unwrap()[0].clone();
        assert!(query.contains("latest news updates"));
        assert!(query.contains(&Utc::now().year().to_string()));
    }

    #[tokio::test]
    async fn interval_gate_blocks_back_to_back_runs() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(MessageDirection::Incoming, "u", "hello world message", None, None, false)
            .unwrap();
        seed_entity_with_facts(&store, "u", "genesis", 1, 1.0);

        let backend = Arc::new(ScriptedSearchBackend::new("text", &[]));
        let search = Arc::new(SearchTool::new(backend.clone(), Arc::clone(&store)));
        let llm = ScriptedLlm::new()
            .with_json(serde_json::json!({ "facts": ["New fact about genesis"] }))
            .with_json(serde_json::json!({ "facts": ["Another fact"] }));
        let agent = agent(llm, Arc::clone(&store), Some(search), false);

        assert!(agent.execute().await.unwrap());
        // Second run inside the interval does nothing.
        assert!(!agent.execute().await.unwrap());
        assert_eq!(backend.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn discovery_creates_related_entity_with_engagement() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(MessageDirection::Incoming, "u", "hello world message", None, None, false)
            .unwrap();
        let entity = seed_entity_with_facts(&store, "u", "kef ls50 meta", 1, 1.0);

        let backend = Arc::new(ScriptedSearchBackend::new(
            "Designed around the Uni-Q driver array.",
            &[],
        ));
        let search = Arc::new(SearchTool::new(backend, Arc::clone(&store)));

        // Pin embeddings so the candidate clears the relevance gate against
        // the enriching entity's regenerated embedding.
        let close = vec![1.0f32, 0.0, 0.0, 0.0];
        let llm = ScriptedLlm::new()
            .with_json(serde_json::json!({ "facts": ["Uses the 12th generation Uni-Q driver"] }))
            .with_json(serde_json::json!({
                "entities": [{ "name": "Uni-Q driver", "tagline": "Coincident speaker driver array" }]
            }))
            // facts for the discovered entity
            .with_json(serde_json::json!({ "facts": ["Coincident tweeter and midrange design"] }));
        let llm = llm.clone().with_embedding("uni-q driver", close.clone());
        // Entity embed text after new fact: pin everything relevant close.
        let agent = EnrichAgent::new(
            llm.clone(),
            Arc::clone(&store),
            Some(search),
            None,
            Some("embedder".to_string()),
            {
                let mut cfg = RuntimeConfig::default();
                // Hashed pseudo-embeddings land far apart; accept anything
                // non-negative for this test and dedup only near-identity.
                cfg.enrichment_discovery_similarity_threshold = -1.0;
                cfg.entity_dedup_embedding_threshold = 1.01;
                cfg
            },
        );

        agent.execute().await.unwrap();

        let discovered = store.get_or_create_entity("u", "uni-q driver").unwrap();
        assert_eq!(discovered.tagline.as_deref(), Some("coincident speaker driver array"));
        let facts = store.get_entity_facts(discovered.id).unwrap();
        assert_eq!(facts.len(), 1);

        let engagements = store.get_user_engagements("u").unwrap();
        assert!(engagements
            .iter()
            .any(|e| e.engagement_type == EngagementType::SearchDiscovery
                && e.entity_id == Some(discovered.id)));
        let _ = entity;
    }
}
