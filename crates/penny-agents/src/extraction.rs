//! Unified extraction pipeline: turns raw search responses and user
//! messages into entities, facts, and preferences with embeddings.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use penny_core::config::RuntimeConfig;
use penny_core::constants;
use penny_llm::embeddings::{
    build_entity_embed_text, deserialize_embedding, find_similar, serialize_embedding,
};
use penny_llm::similarity::normalize_fact;
use penny_llm::{ChatMessage, ChatRequest, LlmBackend};
use penny_scheduler::{Agent, AgentResult};
use penny_store::{
    EngagementType, EngagementValence, EntityRow, FactRow, KnowledgeStore, MessageRow,
    PreferenceType,
};

use penny_channels::Outbound;

use crate::prompts;
use crate::schemas::{parse_structured, ExtractedFacts, ExtractedTopics, IdentifiedEntities};

pub(crate) fn is_valid_entity_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= constants::MAX_ENTITY_NAME_LENGTH
        && name.chars().any(|c| c.is_alphanumeric())
}

pub struct ExtractionPipeline {
    llm: Arc<dyn LlmBackend>,
    store: Arc<KnowledgeStore>,
    outbound: Option<Outbound>,
    background_model: Option<String>,
    embedding_model: Option<String>,
    config: RuntimeConfig,
}

#[async_trait]
impl Agent for ExtractionPipeline {
    fn name(&self) -> &'static str {
        "extraction"
    }

    /// Process unextracted search logs, then unprocessed messages, then
    /// backfill embeddings.
    async fn execute(&self) -> AgentResult {
        let mut work_done = self.process_search_logs().await?;
        work_done |= self.process_messages().await?;
        if self.embedding_model.is_some() {
            work_done |= self.backfill_embeddings().await?;
        }
        Ok(work_done)
    }
}

impl ExtractionPipeline {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        store: Arc<KnowledgeStore>,
        outbound: Option<Outbound>,
        background_model: Option<String>,
        embedding_model: Option<String>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            llm,
            store,
            outbound,
            background_model,
            embedding_model,
            config,
        }
    }

    /// One structured background-model call. Soft-fails to `None`.
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

    // --- Phase 1: search log extraction --------------------------------

    async fn process_search_logs(&self) -> AgentResult {
        let logs = self
            .store
            .get_unextracted_search_logs(constants::ENTITY_EXTRACTION_BATCH_LIMIT)?;
        if logs.is_empty() {
            return Ok(false);
        }

        info!(count = logs.len(), "processing unextracted search logs");
        let mut work_done = false;

        for log in logs {
            let user = self.store.find_sender_for_timestamp(log.timestamp)?;
            let Some(user) = user else {
                self.store.mark_search_extracted(log.id)?;
                continue;
            };

            info!(query = %log.query, "extracting entities from search");
            let entities = self
                .extract_and_store_entities(
                    &user,
                    prompts::ENTITY_IDENTIFICATION_PROMPT,
                    prompts::ENTITY_FACT_EXTRACTION_PROMPT,
                    "Search query",
                    &log.query,
                    &log.response,
                    Some(log.id),
                    None,
                )
                .await?;
            if !entities.is_empty() {
                work_done = true;
            }

            // Extracted regardless of yield; a log is never reprocessed.
            self.store.mark_search_extracted(log.id)?;
        }

        Ok(work_done)
    }

    // --- Phase 2: message extraction -----------------------------------

    async fn process_messages(&self) -> AgentResult {
        let senders = self.store.get_all_senders()?;
        let mut work_done = false;

        for sender in senders {
            let reactions = self
                .store
                .get_unprocessed_reactions(&sender, constants::PREFERENCE_BATCH_LIMIT)?;
            let messages = self
                .store
                .get_unprocessed_messages(&sender, constants::PREFERENCE_BATCH_LIMIT)?;
            if reactions.is_empty() && messages.is_empty() {
                continue;
            }

            for message in &messages {
                if !Self::should_process_message(message) {
                    continue;
                }
                let entities = self
                    .extract_and_store_entities(
                        &sender,
                        prompts::MESSAGE_ENTITY_IDENTIFICATION_PROMPT,
                        prompts::MESSAGE_FACT_EXTRACTION_PROMPT,
                        "User message",
                        &message.content,
                        &message.content,
                        None,
                        Some(message.id),
                    )
                    .await?;
                if !entities.is_empty() {
                    work_done = true;
                    for entity in &entities {
                        self.store.add_engagement(
                            &sender,
                            Some(entity.id),
                            EngagementType::MessageMention,
                            EngagementValence::Neutral,
                            constants::ENGAGEMENT_STRENGTH_MESSAGE_MENTION,
                            Some(message.id),
                        )?;
                    }
                }
            }

            work_done |= self.extract_preferences(&sender, &reactions, &messages).await?;

            let reaction_ids: Vec<i64> = reactions.iter().map(|r| r.id).collect();
            let message_ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
            self.store.mark_messages_processed(&reaction_ids)?;
            self.store.mark_messages_processed(&message_ids)?;
        }

        Ok(work_done)
    }

    fn should_process_message(message: &MessageRow) -> bool {
        let content = message.content.trim();
        content.len() >= constants::MIN_EXTRACTION_MESSAGE_LENGTH && !content.starts_with('/')
    }

    // --- Two-pass entity/fact extraction -------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn extract_and_store_entities(
        &self,
        user: &str,
        identification_prompt: &str,
        fact_prompt: &str,
        context_label: &str,
        context_value: &str,
        content: &str,
        source_search_log_id: Option<i64>,
        source_message_id: Option<i64>,
    ) -> Result<Vec<EntityRow>, penny_store::StoreError> {
        let existing_entities = self.store.get_user_entities(user)?;

        let Some(identified) = self
            .identify_entities(&existing_entities, identification_prompt, context_label, context_value, content)
            .await
        else {
            return Ok(Vec::new());
        };

        let mut entities_to_process: Vec<EntityRow> = Vec::new();

        for new_entity in &identified.new {
            let name = new_entity.name.trim().to_lowercase();
            if !is_valid_entity_name(&name) {
                continue;
            }
            let entity = self.store.get_or_create_entity(user, &name)?;
            info!(entity = %entity.name, "new entity discovered");
            entities_to_process.push(entity);
        }

        for known_name in &identified.known {
            let normalized = known_name.trim().to_lowercase();
            if let Some(entity) = existing_entities.iter().find(|e| e.name == normalized) {
                debug!(entity = %entity.name, "known entity referenced");
                entities_to_process.push(entity.clone());
            }
        }

        let mut entities_with_new_facts: Vec<EntityRow> = Vec::new();
        for entity in &entities_to_process {
            let new_facts = self
                .extract_facts(entity, fact_prompt, context_label, context_value, content)
                .await;
            if new_facts.is_empty() {
                continue;
            }

            let existing_facts = self.store.get_entity_facts(entity.id)?;
            let survivors = self.dedup_facts(new_facts, &existing_facts).await;
            if survivors.is_empty() {
                continue;
            }

            let fact_embeddings = self.embed(&survivors).await;
            for (i, fact_text) in survivors.iter().enumerate() {
                let embedding = fact_embeddings
                    .as_ref()
                    .and_then(|vecs| vecs.get(i))
                    .map(|v| serialize_embedding(v));
                self.store.add_fact(
                    entity.id,
                    fact_text,
                    None,
                    source_search_log_id,
                    source_message_id,
                    embedding.as_deref(),
                )?;
                info!(entity = %entity.name, fact = %fact_text, "stored fact");
            }
            entities_with_new_facts.push(entity.clone());
        }

        if !entities_with_new_facts.is_empty() {
            self.update_entity_embeddings(&entities_with_new_facts).await?;
        }

        Ok(entities_to_process)
    }

    async fn identify_entities(
        &self,
        existing: &[EntityRow],
        identification_prompt: &str,
        context_label: &str,
        context_value: &str,
        content: &str,
    ) -> Option<IdentifiedEntities> {
        let mut prompt = format!(
            "{identification_prompt}\n\n{context_label}: {context_value}\n\nContent:\n{content}"
        );
        if !existing.is_empty() {
            prompt.push_str("\n\nKnown entities (return any that appear in the text):\n");
            for entity in existing {
                prompt.push_str(&format!("- {}\n", entity.name));
            }
        }

        let identified: IdentifiedEntities = self
            .generate_structured("identify_entities", prompt, IdentifiedEntities::schema())
            .await?;
        (!identified.is_empty()).then_some(identified)
    }

    async fn extract_facts(
        &self,
        entity: &EntityRow,
        fact_prompt: &str,
        context_label: &str,
        context_value: &str,
        content: &str,
    ) -> Vec<String> {
        let existing_facts = match self.store.get_entity_facts(entity.id) {
            Ok(f) => f,
            Err(e) => {
                warn!("failed to load facts for '{}': {e}", entity.name);
                return Vec::new();
            }
        };

        let mut prompt = format!(
            "{fact_prompt}\n\nEntity: {}\n\n{context_label}: {context_value}\n\nContent:\n{content}",
            entity.name
        );
        if !existing_facts.is_empty() {
            prompt.push_str("\n\nAlready known facts (return only NEW facts not listed here):\n");
            for fact in &existing_facts {
                prompt.push_str(&format!("- {}\n", fact.content));
            }
        }

        self.generate_structured::<ExtractedFacts>("extract_facts", prompt, ExtractedFacts::schema())
            .await
            .map(|e| e.facts)
            .unwrap_or_default()
    }

    /// Two-pass dedup: normalized string match, then embedding similarity.
    async fn dedup_facts(&self, new_facts: Vec<String>, existing: &[FactRow]) -> Vec<String> {
        let mut seen: std::collections::HashSet<String> =
            existing.iter().map(|f| normalize_fact(&f.content)).collect();

        let mut candidates: Vec<String> = Vec::new();
        for fact in new_facts {
            let fact = fact.trim().to_string();
            if fact.is_empty() {
                continue;
            }
            let normalized = normalize_fact(&fact);
            if seen.contains(&normalized) {
                continue;
            }
            seen.insert(normalized);
            candidates.push(fact);
        }

        if candidates.is_empty() || self.embedding_model.is_none() {
            return candidates;
        }

        let existing_with_embeddings: Vec<(i64, Vec<f32>)> = existing
            .iter()
            .filter_map(|f| {
                f.embedding
                    .as_deref()
                    .map(|b| (f.id, deserialize_embedding(b)))
            })
            .collect();
        if existing_with_embeddings.is_empty() {
            return candidates;
        }

        let Some(vecs) = self.embed(&candidates).await else {
            // Embedding failure keeps all candidates rather than dropping facts.
            return candidates;
        };

        let threshold = self.config.fact_dedup_similarity_threshold;
        candidates
            .into_iter()
            .zip(vecs)
            .filter(|(fact, vec)| {
                let matches = find_similar(vec, &existing_with_embeddings, 1, threshold);
                if !matches.is_empty() {
                    debug!(fact = %fact, "skipping duplicate fact (embedding match)");
                    return false;
                }
                true
            })
            .map(|(fact, _)| fact)
            .collect()
    }

    async fn update_entity_embeddings(
        &self,
        entities: &[EntityRow],
    ) -> Result<(), penny_store::StoreError> {
        if self.embedding_model.is_none() {
            return Ok(());
        }
        let mut embed_texts = Vec::with_capacity(entities.len());
        for entity in entities {
            let facts = self.store.get_entity_facts(entity.id)?;
            let fact_texts: Vec<String> = facts.into_iter().map(|f| f.content).collect();
            embed_texts.push(build_entity_embed_text(
                &entity.name,
                &fact_texts,
                entity.tagline.as_deref(),
            ));
        }
        if let Some(vecs) = self.embed(&embed_texts).await {
            for (entity, vec) in entities.iter().zip(vecs) {
                self.store
                    .update_entity_embedding(entity.id, &serialize_embedding(&vec))?;
                debug!(entity = %entity.name, "updated entity embedding");
            }
        }
        Ok(())
    }

    // --- Preference extraction -----------------------------------------

    async fn extract_preferences(
        &self,
        sender: &str,
        reactions: &[MessageRow],
        messages: &[MessageRow],
    ) -> AgentResult {
        let mut like_reaction_texts: Vec<String> = Vec::new();
        let mut dislike_reaction_texts: Vec<String> = Vec::new();

        for reaction in reactions {
            let emoji = reaction.content.as_str();
            let is_like = constants::LIKE_REACTIONS.contains(&emoji);
            let is_dislike = constants::DISLIKE_REACTIONS.contains(&emoji);
            if !is_like && !is_dislike {
                continue;
            }
            let Some(parent_id) = reaction.parent_id else {
                continue;
            };
            let Some(parent) = self.store.get_message(parent_id)? else {
                continue;
            };
            if is_like {
                like_reaction_texts.push(parent.content);
            } else {
                dislike_reaction_texts.push(parent.content);
            }
        }

        let user_message_texts: Vec<String> = messages
            .iter()
            .filter(|m| Self::should_process_message(m))
            .map(|m| m.content.clone())
            .collect();

        let mut work_done = false;
        for (pref_type, reaction_texts) in [
            (PreferenceType::Like, &like_reaction_texts),
            (PreferenceType::Dislike, &dislike_reaction_texts),
        ] {
            if reaction_texts.is_empty() && user_message_texts.is_empty() {
                continue;
            }
            work_done |= self
                .extract_and_store_preferences(sender, pref_type, reaction_texts, &user_message_texts)
                .await?;
        }
        Ok(work_done)
    }

    async fn extract_and_store_preferences(
        &self,
        sender: &str,
        pref_type: PreferenceType,
        reaction_texts: &[String],
        user_message_texts: &[String],
    ) -> AgentResult {
        let existing = self.store.get_preferences(sender, pref_type)?;
        let existing_topics: Vec<&str> = existing.iter().map(|p| p.topic.as_str()).collect();

        let sentiment = match pref_type {
            PreferenceType::Like => "enjoys or is enthusiastic about",
            PreferenceType::Dislike => "dislikes or expresses negativity toward",
        };

        let mut prompt = format!(
            "Find any NEW topics the user {pref_type}s from the messages below.\n\
             Only extract clear {pref_type}s — things the user explicitly {sentiment}.\n\
             Do NOT extract every noun — only genuine preferences.\n\
             Return short phrases (1-4 words each).\n"
        );
        if !existing_topics.is_empty() {
            prompt.push_str(&format!(
                "\nAlready known {pref_type}s: {}\nDo NOT include topics already known above.\n",
                existing_topics.join(", ")
            ));
        }
        if !reaction_texts.is_empty() {
            prompt.push_str(&format!(
                "\nMessages the user reacted to with a {pref_type} emoji:\n"
            ));
            for text in reaction_texts {
                prompt.push_str(&format!("- \"{text}\"\n"));
            }
        }
        if !user_message_texts.is_empty() {
            prompt.push_str("\nMessages from the user:\n");
            for text in user_message_texts {
                prompt.push_str(&format!("- \"{text}\"\n"));
            }
        }

        let Some(extracted) = self
            .generate_structured::<ExtractedTopics>("extract_topics", prompt, ExtractedTopics::schema())
            .await
        else {
            return Ok(false);
        };

        let mut new_topics: Vec<String> = Vec::new();
        for raw in extracted.topics {
            let topic = raw.trim().to_lowercase();
            if topic.is_empty() || existing.iter().any(|p| p.topic == topic) {
                continue;
            }
            if !new_topics.contains(&topic) {
                new_topics.push(topic);
            }
        }
        if new_topics.is_empty() {
            return Ok(false);
        }

        let topic_embeddings = self.embed(&new_topics).await;

        let mut added: Vec<penny_store::PreferenceRow> = Vec::new();
        for (i, topic) in new_topics.iter().enumerate() {
            let embedding = topic_embeddings
                .as_ref()
                .and_then(|vecs| vecs.get(i))
                .map(|v| serialize_embedding(v));
            if let Some(pref) =
                self.store
                    .add_preference(sender, topic, pref_type, embedding.as_deref())?
            {
                info!(user = sender, topic = %pref.topic, kind = %pref_type, "added preference");
                added.push(pref);
            }
        }

        for pref in &added {
            self.link_preference_to_entities(sender, pref).await?;
        }

        if !added.is_empty() {
            self.send_preference_notification(sender, pref_type, &added).await;
        }

        Ok(!added.is_empty())
    }

    /// Connect a new preference to semantically similar entities.
    async fn link_preference_to_entities(
        &self,
        sender: &str,
        preference: &penny_store::PreferenceRow,
    ) -> Result<(), penny_store::StoreError> {
        let Some(pref_embedding) = preference.embedding.as_deref() else {
            return Ok(());
        };
        let entities = self.store.get_user_entities_with_embeddings(sender)?;
        if entities.is_empty() {
            return Ok(());
        }

        let query = deserialize_embedding(pref_embedding);
        let candidates: Vec<(i64, Vec<f32>)> = entities
            .iter()
            .filter_map(|e| e.embedding.as_deref().map(|b| (e.id, deserialize_embedding(b))))
            .collect();
        let matches = find_similar(
            &query,
            &candidates,
            constants::ENTITY_CONTEXT_TOP_K,
            self.config.preference_entity_link_threshold,
        );

        let valence = match preference.pref_type {
            PreferenceType::Like => EngagementValence::Positive,
            PreferenceType::Dislike => EngagementValence::Negative,
        };
        for (entity_id, _score) in matches {
            self.store.add_engagement(
                sender,
                Some(entity_id),
                EngagementType::ExplicitStatement,
                valence,
                constants::ENGAGEMENT_STRENGTH_EXPLICIT_STATEMENT,
                None,
            )?;
            info!(topic = %preference.topic, entity_id, "linked preference to entity");
        }
        Ok(())
    }

    async fn send_preference_notification(
        &self,
        sender: &str,
        pref_type: PreferenceType,
        added: &[penny_store::PreferenceRow],
    ) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        let message = if added.len() == 1 {
            format!("I added {} to your {pref_type}s", added[0].topic)
        } else {
            let bullets: Vec<String> = added.iter().map(|p| format!("• {}", p.topic)).collect();
            format!("I added these to your {pref_type}s:\n{}", bullets.join("\n"))
        };
        if let Err(e) = outbound
            .send_response(sender, &message, None, &[], None)
            .await
        {
            warn!("failed to send preference notification: {e}");
        }
    }

    // --- Phase 3: embedding backfill -----------------------------------

    async fn backfill_embeddings(&self) -> AgentResult {
        let limit = constants::EMBEDDING_BACKFILL_BATCH_LIMIT;
        let mut work_done = false;

        let facts = self.store.get_facts_without_embeddings(limit)?;
        if !facts.is_empty() {
            let texts: Vec<String> = facts.iter().map(|f| f.content.clone()).collect();
            if let Some(vecs) = self.embed(&texts).await {
                for (fact, vec) in facts.iter().zip(vecs) {
                    self.store
                        .update_fact_embedding(fact.id, &serialize_embedding(&vec))?;
                }
                info!(count = facts.len(), "backfilled fact embeddings");
                work_done = true;
            }
        }

        let entities = self.store.get_entities_without_embeddings(limit)?;
        if !entities.is_empty() {
            self.update_entity_embeddings(&entities).await?;
            info!(count = entities.len(), "backfilled entity embeddings");
            work_done = true;
        }

        let prefs = self.store.get_preferences_without_embeddings(limit)?;
        if !prefs.is_empty() {
            let topics: Vec<String> = prefs.iter().map(|p| p.topic.clone()).collect();
            if let Some(vecs) = self.embed(&topics).await {
                for (pref, vec) in prefs.iter().zip(vecs) {
                    self.store
                        .update_preference_embedding(pref.id, &serialize_embedding(&vec))?;
                }
                info!(count = prefs.len(), "backfilled preference embeddings");
                work_done = true;
            }
        }

        Ok(work_done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingChannel, ScriptedLlm};
    use penny_store::{MessageDirection, SearchTrigger};

    fn pipeline(
        llm: Arc<ScriptedLlm>,
        store: Arc<KnowledgeStore>,
        outbound: Option<Outbound>,
    ) -> ExtractionPipeline {
        ExtractionPipeline::new(
            llm,
            store,
            outbound,
            None,
            Some("embedder".to_string()),
            RuntimeConfig::default(),
        )
    }

    #[tokio::test]
    async fn message_extraction_roundtrip() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let msg_id = store
            .log_message(
                MessageDirection::Incoming,
                "+1555",
                "I just bought a KEF LS50 Meta and it sounds amazing",
                None,
                None,
                false,
            )
            .unwrap();

        let llm = ScriptedLlm::new()
            // identify entities
            .with_json(serde_json::json!({ "known": [], "new": [{ "name": "KEF LS50 Meta" }] }))
            // extract facts
            .with_json(serde_json::json!({ "facts": ["User is interested in this speaker"] }))
            // like preferences, dislike preferences
            .with_json(serde_json::json!({ "topics": [] }))
            .with_json(serde_json::json!({ "topics": [] }));

        let agent = pipeline(llm, Arc::clone(&store), None);
        let did_work = agent.execute().await.unwrap();
        assert!(did_work);

        let entity = store.get_or_create_entity("+1555", "kef ls50 meta").unwrap();
        let facts = store.get_entity_facts(entity.id).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "User is interested in this speaker");
        assert_eq!(facts[0].source_message_id, Some(msg_id));

        let engagements = store.get_user_engagements("+1555").unwrap();
        assert_eq!(engagements.len(), 1);
        assert_eq!(engagements[0].engagement_type, EngagementType::MessageMention);
        assert_eq!(engagements[0].valence, EngagementValence::Neutral);
        assert!(
            (engagements[0].strength - constants::ENGAGEMENT_STRENGTH_MESSAGE_MENTION).abs()
                < f64::EPSILON
        );

        // The message is processed in one pass.
        assert!(store.get_unprocessed_messages("+1555", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_log_marked_extracted_even_without_yield() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(MessageDirection::Incoming, "+1555", "weather please", None, None, false)
            .unwrap();
        store.mark_messages_processed(&[1]).unwrap();
        let log_id = store
            .log_search("weather today", "sunny and mild", SearchTrigger::UserMessage, None)
            .unwrap();

        // Identification returns nothing.
        let llm = ScriptedLlm::new().with_json(serde_json::json!({ "known": [], "new": [] }));
        let agent = pipeline(llm, Arc::clone(&store), None);
        agent.execute().await.unwrap();

        assert!(store.get_search_log(log_id).unwrap().unwrap().extracted);
    }

    #[tokio::test]
    async fn extraction_is_idempotent_across_passes() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(
                MessageDirection::Incoming,
                "+1555",
                "thinking about the kef ls50 meta again",
                None,
                None,
                false,
            )
            .unwrap();

        // First pass discovers the entity and a fact.
        let llm = ScriptedLlm::new()
            .with_json(serde_json::json!({ "known": [], "new": [{ "name": "kef ls50 meta" }] }))
            .with_json(serde_json::json!({ "facts": ["Costs $1,599 per pair"] }))
            .with_json(serde_json::json!({ "topics": [] }))
            .with_json(serde_json::json!({ "topics": [] }));
        pipeline(llm, Arc::clone(&store), None)
            .execute()
            .await
            .unwrap();

        // Second pass re-presents the same fact; string dedup drops it.
        store
            .log_message(
                MessageDirection::Incoming,
                "+1555",
                "what was that speaker price again?",
                None,
                None,
                false,
            )
            .unwrap();
        let llm = ScriptedLlm::new()
            .with_json(serde_json::json!({ "known": ["kef ls50 meta"], "new": [] }))
            .with_json(serde_json::json!({ "facts": ["- costs $1,599  per pair"] }))
            .with_json(serde_json::json!({ "topics": [] }))
            .with_json(serde_json::json!({ "topics": [] }));
        pipeline(llm, Arc::clone(&store), None)
            .execute()
            .await
            .unwrap();

        let entity = store.get_or_create_entity("+1555", "kef ls50 meta").unwrap();
        assert_eq!(store.get_entity_facts(entity.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn short_and_command_messages_are_skipped_but_marked() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .log_message(MessageDirection::Incoming, "+1555", "ok", None, None, false)
            .unwrap();
        store
            .log_message(MessageDirection::Incoming, "+1555", "/commands list", None, None, false)
            .unwrap();

        let llm = ScriptedLlm::new();
        let agent = pipeline(llm.clone(), Arc::clone(&store), None);
        agent.execute().await.unwrap();

        assert!(store.get_unprocessed_messages("+1555", 10).unwrap().is_empty());
        assert!(store.get_user_entities("+1555").unwrap().is_empty());
    }

    #[tokio::test]
    async fn reaction_emoji_drives_preference_and_notification() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let outgoing = store
            .log_message(
                MessageDirection::Outgoing,
                "penny",
                "News about synthwave artists you might like",
                None,
                None,
                false,
            )
            .unwrap();
        store
            .log_message(MessageDirection::Incoming, "+1555", "👍", Some(outgoing), None, true)
            .unwrap();

        // Only the like pass runs a structured call for the 👍 reaction.
        let llm = ScriptedLlm::new().with_json(serde_json::json!({ "topics": ["synthwave"] }));

        let channel = RecordingChannel::new();
        let outbound = Outbound::new(channel.clone(), Arc::clone(&store));
        let agent = pipeline(llm, Arc::clone(&store), Some(outbound));
        let did_work = agent.execute().await.unwrap();
        assert!(did_work);

        let likes = store.get_preferences("+1555", PreferenceType::Like).unwrap();
        assert_eq!(likes.len(), 1);
        assert_eq!(likes[0].topic, "synthwave");

        let sent = channel.sent_messages();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("synthwave"));
        assert!(sent[0].1.contains("like"));
    }

    #[tokio::test]
    async fn like_then_dislike_toggles_single_row() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        store
            .add_preference("+1555", "jazz", PreferenceType::Like, None)
            .unwrap();

        let outgoing = store
            .log_message(MessageDirection::Outgoing, "penny", "more jazz news", None, None, false)
            .unwrap();
        store
            .log_message(MessageDirection::Incoming, "+1555", "👎", Some(outgoing), None, true)
            .unwrap();

        // Only the dislike pass runs a structured call: there are no like
        // reactions and no processable user messages.
        let llm = ScriptedLlm::new().with_json(serde_json::json!({ "topics": ["jazz"] }));
        pipeline(llm, Arc::clone(&store), None)
            .execute()
            .await
            .unwrap();

        assert!(store.get_preferences("+1555", PreferenceType::Like).unwrap().is_empty());
        let dislikes = store.get_preferences("+1555", PreferenceType::Dislike).unwrap();
        assert_eq!(dislikes.len(), 1, "toggle moves, never duplicates");
    }

    #[tokio::test]
    async fn backfill_fills_missing_embeddings() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let entity = store.get_or_create_entity("+1555", "genesis").unwrap();
        store
            .add_fact(entity.id, "Formed in 1967", None, None, None, None)
            .unwrap();

        let llm = ScriptedLlm::new();
        let agent = pipeline(llm, Arc::clone(&store), None);
        let did_work = agent.execute().await.unwrap();
        assert!(did_work, "backfill counts as work");

        assert!(store.get_facts_without_embeddings(10).unwrap().is_empty());
        assert!(store.get_entities_without_embeddings(10).unwrap().is_empty());
    }
}
