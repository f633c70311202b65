//! Notification agent: owns all proactive messaging.
//!
//! Extraction and enrichment store facts silently; this agent decides what
//! to surface and when. Per cycle and per user, in priority order: learn
//! completion announcements (bypass backoff), a pending news rate-limit
//! note, event digests for follow prompts whose cron has fired, then at
//! most one heat-ranked fact discovery message gated by per-user
//! exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use penny_channels::Outbound;
use penny_core::config::RuntimeConfig;
use penny_core::responses;
use penny_llm::Role;
use penny_scheduler::cron::cron_due;
use penny_scheduler::{Agent, AgentResult};
use penny_store::{EntityRow, FactRow, KnowledgeStore, LearnPromptRow};

use crate::compose::Composer;
use crate::interest::compute_interest_score;
use crate::prompts;
use crate::tools::news::NewsClient;

/// Per-user backoff state. In memory only: after a restart users revert to
/// the eager state on purpose — Penny should not nag across restarts as if
/// no time had passed.
#[derive(Default)]
struct UserBackoff {
    last_action: Option<DateTime<Utc>>,
    backoff_seconds: f64,
}

/// Marker for the ignore penalty: the last entity surfaced to a user and
/// when. Checked at the start of the user's next cycle.
struct LastSurfaced {
    entity_id: i64,
    at: DateTime<Utc>,
}

pub struct NotificationAgent {
    store: Arc<KnowledgeStore>,
    outbound: Outbound,
    composer: Composer,
    news: Option<Arc<NewsClient>>,
    config: RuntimeConfig,
    backoff: DashMap<String, UserBackoff>,
    last_surfaced: DashMap<String, LastSurfaced>,
}

#[async_trait]
impl Agent for NotificationAgent {
    fn name(&self) -> &'static str {
        "notification"
    }

    /// Send at most one proactive message across all users (learn
    /// completions excepted — the user explicitly asked for those).
    async fn execute(&self) -> AgentResult {
        if self.try_rate_limit_notice().await? {
            return Ok(true);
        }

        let users = self.store.get_all_senders()?;
        for user in users {
            if self.try_learn_completions(&user).await? {
                return Ok(true);
            }
            if self.try_event_digest(&user).await? {
                return Ok(true);
            }
            if self.try_discovery(&user).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl NotificationAgent {
    pub fn new(
        store: Arc<KnowledgeStore>,
        outbound: Outbound,
        composer: Composer,
        news: Option<Arc<NewsClient>>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            store,
            outbound,
            composer,
            news,
            config,
            backoff: DashMap::new(),
            last_surfaced: DashMap::new(),
        }
    }

    // --- News rate-limit note ------------------------------------------

    async fn try_rate_limit_notice(&self) -> AgentResult {
        let Some(news) = &self.news else {
            return Ok(false);
        };
        if !news.consume_rate_limit_notification() {
            return Ok(false);
        }
        let mut sent = false;
        for user in self.store.get_all_senders()? {
            if self
                .outbound
                .send_response(&user, responses::NEWS_RATE_LIMITED, None, &[], None)
                .await
                .is_ok()
            {
                sent = true;
            }
        }
        Ok(sent)
    }

    // --- Class 1: learn completion announcements -----------------------

    /// Announce every completed learn prompt whose extraction has finished.
    /// Bypasses backoff entirely and does not touch backoff state.
    async fn try_learn_completions(&self, user: &str) -> AgentResult {
        let prompts = self.store.get_unannounced_completed_learn_prompts(user)?;
        if prompts.is_empty() {
            return Ok(false);
        }

        let mut any_sent = false;
        for lp in prompts {
            let logs = self.store.get_search_logs_by_learn_prompt(lp.id)?;
            if logs.is_empty() {
                // No searches ran (e.g. no search tool) — nothing to announce.
                self.store.mark_learn_prompt_announced(lp.id)?;
                continue;
            }
            if !logs.iter().all(|l| l.extracted) {
                continue; // extraction not finished yet
            }

            if !self.send_learn_completion(&lp, user).await? {
                continue;
            }

            let log_ids: Vec<i64> = logs.iter().map(|l| l.id).collect();
            let facts = self.store.get_facts_by_search_log_ids(&log_ids)?;
            let unnotified: Vec<i64> = facts
                .iter()
                .filter(|f| f.notified_at.is_none())
                .map(|f| f.id)
                .collect();
            self.store.mark_facts_notified(&unnotified)?;
            self.store.mark_learn_prompt_announced(lp.id)?;
            any_sent = true;
        }
        Ok(any_sent)
    }

    async fn send_learn_completion(&self, lp: &LearnPromptRow, user: &str) -> AgentResult {
        let logs = self.store.get_search_logs_by_learn_prompt(lp.id)?;
        let log_ids: Vec<i64> = logs.iter().map(|l| l.id).collect();
        let facts = self.store.get_facts_by_search_log_ids(&log_ids)?;

        if facts.is_empty() {
            let message = format!(
                "{}\n\n{}",
                responses::LEARN_COMPLETE_HEADER.replace("{topic}", &lp.prompt_text),
                responses::LEARN_COMPLETE_NO_ENTITIES
            );
            self.outbound
                .send_response(user, &message, None, &[], None)
                .await?;
            info!(topic = %lp.prompt_text, user, "learn completion sent (no entities)");
            return Ok(true);
        }

        // Group facts by entity, highest-interest entities first.
        let mut facts_by_entity: HashMap<i64, Vec<&FactRow>> = HashMap::new();
        for fact in &facts {
            facts_by_entity.entry(fact.entity_id).or_default().push(fact);
        }
        let engagements = self.store.get_user_engagements(user)?;
        let now = Utc::now();

        let mut sections: Vec<(f64, String)> = Vec::new();
        for (entity_id, entity_facts) in &facts_by_entity {
            let Some(entity) = self.store.get_entity(*entity_id)? else {
                continue;
            };
            let entity_engagements: Vec<_> = engagements
                .iter()
                .filter(|e| e.entity_id == Some(*entity_id))
                .cloned()
                .collect();
            let score = compute_interest_score(
                &entity_engagements,
                self.config.interest_score_half_life_days,
                now,
            );
            let fact_lines: Vec<String> =
                entity_facts.iter().map(|f| format!("- {}", f.content)).collect();
            sections.push((score, format!("{}:\n{}", entity.name, fact_lines.join("\n"))));
        }
        sections.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let prompt = format!(
            "{}\n\nEntities and facts discovered:\n\n{}",
            prompts::LEARN_COMPLETION_SUMMARY_PROMPT.replace("{topic}", &lp.prompt_text),
            sections
                .into_iter()
                .map(|(_, s)| s)
                .collect::<Vec<_>>()
                .join("\n\n")
        );

        let Some(message) = self.composer.compose(&prompt, &[]).await else {
            warn!(topic = %lp.prompt_text, "failed to compose learn completion");
            return Ok(false);
        };
        self.outbound
            .send_response(user, &message, None, &[], None)
            .await?;
        info!(topic = %lp.prompt_text, user, "learn completion announcement sent");
        Ok(true)
    }

    // --- Class 2: event digests ----------------------------------------

    async fn try_event_digest(&self, user: &str) -> AgentResult {
        let now = Utc::now();
        for fp in self.store.get_active_follow_prompts_for_user(user)? {
            if !cron_due(&fp.cron_expression, &fp.user_timezone, fp.last_notified_at, now) {
                continue;
            }
            let events = self.store.get_unnotified_events_for_prompt(fp.id)?;
            if events.is_empty() {
                continue;
            }

            let event_lines: Vec<String> = events
                .iter()
                .map(|e| format!("- {} ({})", e.headline, e.summary))
                .collect();
            let prompt = format!(
                "{}\n\nEvents:\n{}",
                prompts::EVENT_DIGEST_PROMPT.replace("{topic}", &fp.prompt_text),
                event_lines.join("\n")
            );
            let Some(message) = self.composer.compose(&prompt, &[]).await else {
                continue;
            };
            if message.len() < self.config.notification_min_length {
                debug!(chars = message.len(), "dropping near-empty event digest");
                continue;
            }

            self.outbound
                .send_response(user, &message, None, &[], None)
                .await?;
            let event_ids: Vec<i64> = events.iter().map(|e| e.id).collect();
            self.store.mark_events_notified(&event_ids)?;
            self.store.update_follow_prompt_last_notified(fp.id)?;
            info!(topic = %fp.prompt_text, count = events.len(), user, "event digest sent");
            return Ok(true);
        }
        Ok(false)
    }

    // --- Class 3: heat-ranked fact discovery ---------------------------

    async fn try_discovery(&self, user: &str) -> AgentResult {
        // Cycle bookkeeping happens before the send gate so cooldowns tick
        // and ignored notifications are penalized even while backed off.
        self.store.decrement_heat_cooldowns(user)?;
        self.apply_ignore_penalty(user)?;

        if !self.should_send(user)? {
            return Ok(false);
        }

        let unnotified = self.store.get_unnotified_facts(user)?;
        if unnotified.is_empty() {
            return Ok(false);
        }

        let mut facts_by_entity: HashMap<i64, Vec<FactRow>> = HashMap::new();
        for fact in unnotified {
            facts_by_entity.entry(fact.entity_id).or_default().push(fact);
        }

        let Some(entity) = self.pick_hottest_entity(facts_by_entity.keys().copied())? else {
            return Ok(false);
        };
        let facts = facts_by_entity.remove(&entity.id).unwrap_or_default();

        // A new entity is one the user has never been told about.
        let all_facts = self.store.get_entity_facts(entity.id)?;
        let is_new = all_facts.iter().all(|f| f.notified_at.is_none());

        if !self.send_discovery(user, &entity, &facts, is_new).await? {
            return Ok(false);
        }

        let fact_ids: Vec<i64> = facts.iter().map(|f| f.id).collect();
        self.store.mark_facts_notified(&fact_ids)?;
        self.store
            .set_heat_cooldown(entity.id, self.config.notification_cooldown_cycles)?;
        self.store.update_last_notified_at(entity.id)?;
        self.mark_proactive_sent(user);
        self.last_surfaced.insert(
            user.to_string(),
            LastSurfaced {
                entity_id: entity.id,
                at: Utc::now(),
            },
        );
        Ok(true)
    }

    /// Highest heat wins. Zero heat is a veto; cooldown forces rotation.
    fn pick_hottest_entity(
        &self,
        candidate_ids: impl Iterator<Item = i64>,
    ) -> Result<Option<EntityRow>, penny_store::StoreError> {
        let mut best: Option<EntityRow> = None;
        for id in candidate_ids {
            let Some(entity) = self.store.get_entity(id)? else {
                continue;
            };
            if entity.heat <= 0.0 || entity.heat_cooldown > 0 {
                continue;
            }
            match &best {
                Some(current) if current.heat >= entity.heat => {}
                _ => best = Some(entity),
            }
        }
        Ok(best)
    }

    async fn send_discovery(
        &self,
        user: &str,
        entity: &EntityRow,
        facts: &[FactRow],
        is_new: bool,
    ) -> AgentResult {
        let template = if is_new {
            prompts::FACT_DISCOVERY_NEW_ENTITY_PROMPT
        } else {
            prompts::FACT_DISCOVERY_KNOWN_ENTITY_PROMPT
        };
        let fact_lines: Vec<String> = facts.iter().map(|f| format!("- {}", f.content)).collect();
        let prompt = format!(
            "{}\n\nNew facts:\n{}",
            template.replace("{entity}", &entity.name),
            fact_lines.join("\n")
        );

        // A fake user turn gives the model a conversational anchor instead
        // of composing into the void.
        let history = vec![(Role::User, format!("what's new with {}?", entity.name))];
        let Some(message) = self.composer.compose(&prompt, &history).await else {
            return Ok(false);
        };
        if message.len() < self.config.notification_min_length {
            debug!(chars = message.len(), "dropping near-empty notification");
            return Ok(false);
        }

        self.outbound
            .send_response(user, &message, None, &[], None)
            .await?;
        info!(entity = %entity.name, facts = facts.len(), user, "discovery notification sent");
        Ok(true)
    }

    // --- Ignore penalty ------------------------------------------------

    /// If the previously surfaced entity got no engagement since the send,
    /// reduce its heat so it stops dominating future cycles.
    fn apply_ignore_penalty(&self, user: &str) -> Result<(), penny_store::StoreError> {
        let Some((_, surfaced)) = self.last_surfaced.remove(user) else {
            return Ok(());
        };
        if !self
            .store
            .has_engagement_since(user, surfaced.entity_id, surfaced.at)?
        {
            self.store
                .scale_heat(surfaced.entity_id, self.config.notification_ignore_penalty)?;
            debug!(
                entity_id = surfaced.entity_id,
                user, "ignored notification: heat penalized"
            );
        }
        Ok(())
    }

    // --- Backoff -------------------------------------------------------

    /// The send gate: eager when we've never notified this user; otherwise
    /// the user must have sent a real message since our last send AND the
    /// backoff interval must have elapsed. Passing the gate via engagement
    /// clears the stored backoff so the next send starts from the initial
    /// value again.
    fn should_send(&self, user: &str) -> Result<bool, penny_store::StoreError> {
        let Some(mut state) = self.backoff.get_mut(user) else {
            return Ok(true);
        };
        let Some(last_action) = state.last_action else {
            return Ok(true);
        };

        let engaged = self
            .store
            .get_latest_user_interaction_time(user)?
            .is_some_and(|t| t > last_action);
        if !engaged {
            return Ok(false);
        }

        let elapsed = (Utc::now() - last_action).num_milliseconds() as f64 / 1000.0;
        if elapsed >= state.backoff_seconds {
            state.backoff_seconds = 0.0;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn mark_proactive_sent(&self, user: &str) {
        let mut state = self.backoff.entry(user.to_string()).or_default();
        state.last_action = Some(Utc::now());
        state.backoff_seconds = if state.backoff_seconds <= 0.0 {
            self.config.notification_initial_backoff_secs
        } else {
            (state.backoff_seconds * 2.0).min(self.config.notification_max_backoff_secs)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingChannel, ScriptedLlm};
    use penny_store::{MessageDirection, SearchTrigger};
    use std::time::Duration;

    const LONG_REPLY: &str = "Here is something genuinely interesting I learned about that.";

    struct Fixture {
        store: Arc<KnowledgeStore>,
        channel: Arc<RecordingChannel>,
        agent: NotificationAgent,
    }

    fn fixture(news: Option<Arc<NewsClient>>, config: RuntimeConfig) -> Fixture {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let channel = RecordingChannel::new();
        let outbound = Outbound::new(channel.clone(), Arc::clone(&store));
        let llm = ScriptedLlm::new().with_fallback(LONG_REPLY);
        let composer = Composer::new(llm, None);
        let agent = NotificationAgent::new(Arc::clone(&store), outbound, composer, news, config);
        Fixture {
            store,
            channel,
            agent,
        }
    }

    /// Seed a user (one processed incoming message) and an entity with one
    /// un-notified fact and the given heat.
    fn seed_entity(f: &Fixture, user: &str, name: &str, heat: f64) -> EntityRow {
        let msg = f
            .store
            .log_message(MessageDirection::Incoming, user, "an ordinary message", None, None, false)
            .unwrap();
        f.store.mark_messages_processed(&[msg]).unwrap();
        let entity = f.store.get_or_create_entity(user, name).unwrap();
        f.store
            .add_fact(entity.id, &format!("fresh fact about {name}"), None, None, None, None)
            .unwrap();
        f.store.update_heat(entity.id, heat).unwrap();
        entity
    }

    #[tokio::test]
    async fn prefers_higher_heat_entity() {
        let f = fixture(None, RuntimeConfig::default());
        seed_entity(&f, "u", "boring thing", 1.0);
        let interesting = seed_entity(&f, "u", "interesting thing", 5.0);

        assert!(f.agent.execute().await.unwrap());

        let sent = f.channel.sent_messages();
        assert_eq!(sent.len(), 1);
        // The interesting entity's facts are now notified; the boring one's
        // are untouched.
        assert!(f
            .store
            .get_entity_facts(interesting.id)
            .unwrap()
            .iter()
            .all(|fact| fact.notified_at.is_some()));
        let unnotified = f.store.get_unnotified_facts("u").unwrap();
        assert_eq!(unnotified.len(), 1);
    }

    #[tokio::test]
    async fn zero_heat_entity_is_vetoed() {
        let f = fixture(None, RuntimeConfig::default());
        let vetoed = seed_entity(&f, "u", "vetoed thing", 0.0);
        let fallback = seed_entity(&f, "u", "fallback thing", 3.0);

        assert!(f.agent.execute().await.unwrap());

        assert!(f
            .store
            .get_entity_facts(fallback.id)
            .unwrap()
            .iter()
            .all(|fact| fact.notified_at.is_some()));
        assert!(f
            .store
            .get_entity_facts(vetoed.id)
            .unwrap()
            .iter()
            .all(|fact| fact.notified_at.is_none()));
    }

    #[tokio::test]
    async fn cooldown_forces_rotation() {
        let f = fixture(None, RuntimeConfig::default());
        let hot = seed_entity(&f, "u", "hot thing", 5.0);
        f.store.set_heat_cooldown(hot.id, 3).unwrap();
        let cooler = seed_entity(&f, "u", "cooler thing", 2.0);

        assert!(f.agent.execute().await.unwrap());

        assert!(f
            .store
            .get_entity_facts(cooler.id)
            .unwrap()
            .iter()
            .all(|fact| fact.notified_at.is_some()));
        // The cycle decremented the hot entity's cooldown by one.
        assert_eq!(f.store.get_entity(hot.id).unwrap().unwrap().heat_cooldown, 2);
    }

    #[tokio::test]
    async fn ignored_notification_penalizes_heat() {
        let mut config = RuntimeConfig::default();
        config.notification_initial_backoff_secs = 0.01;
        let f = fixture(None, config);
        let entity = seed_entity(&f, "u", "entity a", 5.0);

        // Cycle 1 notifies about entity A.
        assert!(f.agent.execute().await.unwrap());
        let heat_before = f.store.get_entity(entity.id).unwrap().unwrap().heat;

        // The user engages (so the backoff gate re-opens) but never with
        // entity A itself; seed another entity so cycle 2 has work.
        tokio::time::sleep(Duration::from_millis(30)).await;
        f.store
            .log_message(MessageDirection::Incoming, "u", "talking about other things", None, None, false)
            .unwrap();
        seed_entity(&f, "u", "entity b", 3.0);

        assert!(f.agent.execute().await.unwrap());

        let heat_after = f.store.get_entity(entity.id).unwrap().unwrap().heat;
        assert!(
            heat_after < heat_before,
            "no engagement since the send: heat {heat_before} -> {heat_after}"
        );
    }

    #[tokio::test]
    async fn backoff_gates_until_user_engages_and_interval_elapses() {
        let mut config = RuntimeConfig::default();
        config.notification_initial_backoff_secs = 0.05;
        let f = fixture(None, config);
        seed_entity(&f, "u", "entity a", 5.0);

        // Cycle 1 fires.
        assert!(f.agent.execute().await.unwrap());

        // Cycle 2, immediately: suppressed (no engagement since the send).
        seed_entity(&f, "u", "entity b", 4.0);
        // seed_entity logged a processed message, which counts as a real
        // user message — but it predates nothing; it is new engagement.
        // Within the 50 ms backoff it must still be suppressed.
        assert!(!f.agent.execute().await.unwrap());

        // A cycle after the backoff interval fires.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(f.agent.execute().await.unwrap());
        assert_eq!(f.channel.sent_messages().len(), 2);
    }

    #[tokio::test]
    async fn silence_suppresses_even_after_interval() {
        let mut config = RuntimeConfig::default();
        config.notification_initial_backoff_secs = 0.01;
        let f = fixture(None, config);
        seed_entity(&f, "u", "entity a", 5.0);

        assert!(f.agent.execute().await.unwrap());
        seed_entity_no_message(&f, "u", "entity b", 4.0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        // Interval elapsed but the user has said nothing since the send.
        assert!(!f.agent.execute().await.unwrap());
    }

    fn seed_entity_no_message(f: &Fixture, user: &str, name: &str, heat: f64) -> EntityRow {
        let entity = f.store.get_or_create_entity(user, name).unwrap();
        f.store
            .add_fact(entity.id, &format!("fresh fact about {name}"), None, None, None, None)
            .unwrap();
        f.store.update_heat(entity.id, heat).unwrap();
        entity
    }

    #[tokio::test]
    async fn learn_completion_bypasses_backoff_and_marks_everything() {
        let mut config = RuntimeConfig::default();
        config.notification_initial_backoff_secs = 3600.0;
        let f = fixture(None, config);

        // Exhaust the discovery backoff first.
        seed_entity(&f, "u", "warmup entity", 5.0);
        assert!(f.agent.execute().await.unwrap());

        // A completed learn prompt with extracted search logs and facts.
        let lp = f.store.create_learn_prompt("u", "speakers", 1).unwrap();
        f.store.decrement_learn_searches(lp.id).unwrap();
        let log_id = f
            .store
            .log_search("kef ls50", "a speaker", SearchTrigger::LearnCommand, Some(lp.id))
            .unwrap();
        f.store.mark_search_extracted(log_id).unwrap();
        let entity = f.store.get_or_create_entity("u", "kef ls50 meta").unwrap();
        let fact_id = f
            .store
            .add_fact(entity.id, "Costs $1,599 per pair", None, Some(log_id), None, None)
            .unwrap();

        // Despite the hour-long backoff, the announcement goes out.
        assert!(f.agent.execute().await.unwrap());

        let lp = f.store.get_learn_prompt(lp.id).unwrap().unwrap();
        assert!(lp.announced_at.is_some());
        let facts = f.store.get_entity_facts(entity.id).unwrap();
        assert!(facts.iter().find(|x| x.id == fact_id).unwrap().notified_at.is_some());
    }

    #[tokio::test]
    async fn learn_completion_waits_for_extraction() {
        let f = fixture(None, RuntimeConfig::default());
        f.store
            .log_message(MessageDirection::Incoming, "u", "an ordinary message", None, None, false)
            .unwrap();

        let lp = f.store.create_learn_prompt("u", "speakers", 1).unwrap();
        f.store.decrement_learn_searches(lp.id).unwrap();
        // Search log exists but is not extracted yet.
        f.store
            .log_search("kef ls50", "a speaker", SearchTrigger::LearnCommand, Some(lp.id))
            .unwrap();

        assert!(!f.agent.execute().await.unwrap());
        let lp = f.store.get_learn_prompt(lp.id).unwrap().unwrap();
        assert!(lp.announced_at.is_none());
    }

    #[tokio::test]
    async fn event_digest_marks_events_and_respects_cron() {
        let f = fixture(None, RuntimeConfig::default());
        f.store
            .log_message(MessageDirection::Incoming, "u", "an ordinary message", None, None, false)
            .unwrap();
        let fp = f
            .store
            .create_follow_prompt("u", "spacex", &["spacex".into()], "0 9 * * *", "daily", "UTC")
            .unwrap();
        let event = f
            .store
            .add_event("u", "Starship flies", "…", Utc::now(), None, Some("https://x/1"), Some(fp.id))
            .unwrap()
            .unwrap();

        // Never-notified prompt: cron is due immediately.
        assert!(f.agent.execute().await.unwrap());
        assert!(f
            .store
            .get_unnotified_events_for_prompt(fp.id)
            .unwrap()
            .is_empty());

        // A second fresh event on the same day: cron already fired today.
        f.store
            .add_event("u", "Another flight", "…", Utc::now(), None, Some("https://x/2"), Some(fp.id))
            .unwrap()
            .unwrap();
        assert!(!f.agent.execute().await.unwrap());
        let _ = event;
    }

    #[tokio::test]
    async fn short_composition_is_dropped_silently() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let channel = RecordingChannel::new();
        let outbound = Outbound::new(channel.clone(), Arc::clone(&store));
        // Model produces a near-empty composition.
        let llm = ScriptedLlm::new().with_fallback("ok");
        let composer = Composer::new(llm, None);
        let agent = NotificationAgent::new(
            Arc::clone(&store),
            outbound,
            composer,
            None,
            RuntimeConfig::default(),
        );
        let f = Fixture {
            store,
            channel,
            agent,
        };
        let entity = seed_entity(&f, "u", "entity a", 5.0);

        assert!(!f.agent.execute().await.unwrap());
        assert!(f.channel.sent_messages().is_empty());
        // Facts stay un-notified for a future, successful cycle.
        assert!(f
            .store
            .get_entity_facts(entity.id)
            .unwrap()
            .iter()
            .all(|fact| fact.notified_at.is_none()));
    }

    #[tokio::test]
    async fn rate_limit_notice_is_sent_once() {
        use crate::tools::news::{NewsError, NewsTransport};

        struct RateLimitedNews;
        #[async_trait]
        impl NewsTransport for RateLimitedNews {
            async fn fetch(
                &self,
                _query: &str,
                _from: Option<DateTime<Utc>>,
            ) -> Result<Vec<crate::tools::news::NewsArticle>, NewsError> {
                Err(NewsError::RateLimited)
            }
        }

        let news = Arc::new(NewsClient::new(Box::new(RateLimitedNews), 3600, 43_200));
        let f = fixture(Some(Arc::clone(&news)), RuntimeConfig::default());
        let msg = f
            .store
            .log_message(MessageDirection::Incoming, "u", "an ordinary message", None, None, false)
            .unwrap();
        f.store.mark_messages_processed(&[msg]).unwrap();

        // Trigger the rate limit.
        news.search(&["spacex".to_string()], None).await;

        assert!(f.agent.execute().await.unwrap());
        let sent = f.channel.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, responses::NEWS_RATE_LIMITED);

        // The note does not repeat.
        assert!(!f.agent.execute().await.unwrap());
    }
}
