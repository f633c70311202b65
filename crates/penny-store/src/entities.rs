//! Entities, facts, and engagements — the heart of the knowledge graph.
//!
//! Heat bookkeeping lives here: every engagement written through
//! [`KnowledgeStore::add_engagement`] adjusts the target entity's heat in the
//! same transaction, so the notification agent only ever reads it.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use penny_core::constants;

use crate::error::Result;
use crate::types::{
    parse_opt_ts, parse_ts, EngagementRow, EngagementType, EngagementValence, EntityRow, FactRow,
};
use crate::KnowledgeStore;

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<EntityRow> {
    let created: String = row.get(7)?;
    let enriched: Option<String> = row.get(8)?;
    let notified: Option<String> = row.get(9)?;
    Ok(EntityRow {
        id: row.get(0)?,
        user: row.get(1)?,
        name: row.get(2)?,
        tagline: row.get(3)?,
        embedding: row.get(4)?,
        heat: row.get(5)?,
        heat_cooldown: row.get(6)?,
        created_at: parse_ts(&created),
        last_enriched_at: parse_opt_ts(enriched),
        last_notified_at: parse_opt_ts(notified),
    })
}

fn row_to_fact(row: &Row<'_>) -> rusqlite::Result<FactRow> {
    let learned: String = row.get(6)?;
    let notified: Option<String> = row.get(7)?;
    Ok(FactRow {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        content: row.get(2)?,
        source_url: row.get(3)?,
        source_search_log_id: row.get(4)?,
        source_message_id: row.get(5)?,
        learned_at: parse_ts(&learned),
        notified_at: parse_opt_ts(notified),
        embedding: row.get(8)?,
    })
}

fn row_to_engagement(row: &Row<'_>) -> rusqlite::Result<EngagementRow> {
    let etype: String = row.get(3)?;
    let valence: String = row.get(4)?;
    let created: String = row.get(7)?;
    Ok(EngagementRow {
        id: row.get(0)?,
        user: row.get(1)?,
        entity_id: row.get(2)?,
        engagement_type: etype.parse().unwrap_or(EngagementType::MessageMention),
        valence: valence.parse().unwrap_or(EngagementValence::Neutral),
        strength: row.get(5)?,
        source_message_id: row.get(6)?,
        created_at: parse_ts(&created),
    })
}

const ENTITY_COLS: &str = "id, user, name, tagline, embedding, heat, heat_cooldown, \
                           created_at, last_enriched_at, last_notified_at";
const FACT_COLS: &str = "id, entity_id, content, source_url, source_search_log_id, \
                         source_message_id, learned_at, notified_at, embedding";
const ENGAGEMENT_COLS: &str = "id, user, entity_id, engagement_type, valence, strength, \
                               source_message_id, created_at";

fn heat_weight(engagement_type: EngagementType) -> f64 {
    match engagement_type {
        EngagementType::UserSearch => constants::HEAT_WEIGHT_USER_SEARCH,
        EngagementType::MessageMention => constants::HEAT_WEIGHT_MESSAGE_MENTION,
        EngagementType::EmojiReaction => constants::HEAT_WEIGHT_EMOJI_REACTION,
        EngagementType::ExplicitStatement => constants::HEAT_WEIGHT_EXPLICIT_STATEMENT,
        EngagementType::SearchDiscovery => constants::HEAT_WEIGHT_SEARCH_DISCOVERY,
    }
}

impl KnowledgeStore {
    /// Find or create an entity by canonical (lowercased, trimmed) name.
    pub fn get_or_create_entity(&self, user: &str, name: &str) -> Result<EntityRow> {
        let name = name.trim().to_lowercase();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO entities (user, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user, name) DO NOTHING",
            params![user, name, Utc::now().to_rfc3339()],
        )?;
        let row = conn.query_row(
            &format!("SELECT {ENTITY_COLS} FROM entities WHERE user = ?1 AND name = ?2"),
            params![user, name],
            row_to_entity,
        )?;
        Ok(row)
    }

    pub fn get_entity(&self, id: i64) -> Result<Option<EntityRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {ENTITY_COLS} FROM entities WHERE id = ?1"),
                [id],
                row_to_entity,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_user_entities(&self, user: &str) -> Result<Vec<EntityRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLS} FROM entities WHERE user = ?1 ORDER BY name"
        ))?;
        let rows = stmt.query_map([user], row_to_entity)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_user_entities_with_embeddings(&self, user: &str) -> Result<Vec<EntityRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLS} FROM entities
             WHERE user = ?1 AND embedding IS NOT NULL ORDER BY name"
        ))?;
        let rows = stmt.query_map([user], row_to_entity)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_entities_without_embeddings(&self, limit: usize) -> Result<Vec<EntityRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLS} FROM entities WHERE embedding IS NULL LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], row_to_entity)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update_entity_embedding(&self, id: i64, embedding: &[u8]) -> Result<()> {
        self.conn().execute(
            "UPDATE entities SET embedding = ?1 WHERE id = ?2",
            params![embedding, id],
        )?;
        Ok(())
    }

    pub fn update_entity_tagline(&self, id: i64, tagline: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE entities SET tagline = ?1 WHERE id = ?2",
            params![tagline, id],
        )?;
        Ok(())
    }

    pub fn update_last_enriched_at(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE entities SET last_enriched_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn update_last_notified_at(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE entities SET last_notified_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn update_heat(&self, id: i64, heat: f64) -> Result<()> {
        self.conn().execute(
            "UPDATE entities SET heat = ?1 WHERE id = ?2",
            params![heat.max(0.0), id],
        )?;
        Ok(())
    }

    /// Multiply an entity's heat by `factor` (ignore penalty).
    pub fn scale_heat(&self, id: i64, factor: f64) -> Result<()> {
        self.conn().execute(
            "UPDATE entities SET heat = MAX(heat * ?1, 0) WHERE id = ?2",
            params![factor, id],
        )?;
        Ok(())
    }

    pub fn set_heat_cooldown(&self, id: i64, cycles: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE entities SET heat_cooldown = ?1 WHERE id = ?2",
            params![cycles, id],
        )?;
        Ok(())
    }

    /// Decrement every cooling entity's counter by one. Called once per
    /// notification cycle per user.
    pub fn decrement_heat_cooldowns(&self, user: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE entities SET heat_cooldown = heat_cooldown - 1
             WHERE user = ?1 AND heat_cooldown > 0",
            [user],
        )?;
        Ok(())
    }

    /// Delete an entity and cascade to its facts and engagements.
    pub fn delete_entity(&self, id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM facts WHERE entity_id = ?1", [id])?;
        tx.execute("DELETE FROM engagements WHERE entity_id = ?1", [id])?;
        tx.execute("DELETE FROM entities WHERE id = ?1", [id])?;
        tx.commit()?;
        info!(entity_id = id, "entity deleted with cascade");
        Ok(())
    }

    // --- Facts ---------------------------------------------------------

    pub fn add_fact(
        &self,
        entity_id: i64,
        content: &str,
        source_url: Option<&str>,
        source_search_log_id: Option<i64>,
        source_message_id: Option<i64>,
        embedding: Option<&[u8]>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO facts
             (entity_id, content, source_url, source_search_log_id, source_message_id,
              learned_at, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entity_id,
                content,
                source_url,
                source_search_log_id,
                source_message_id,
                Utc::now().to_rfc3339(),
                embedding,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_entity_facts(&self, entity_id: i64) -> Result<Vec<FactRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FACT_COLS} FROM facts WHERE entity_id = ?1 ORDER BY learned_at"
        ))?;
        let rows = stmt.query_map([entity_id], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Un-notified facts across all of a user's entities.
    pub fn get_unnotified_facts(&self, user: &str) -> Result<Vec<FactRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT f.id, f.entity_id, f.content, f.source_url, f.source_search_log_id,
                    f.source_message_id, f.learned_at, f.notified_at, f.embedding
             FROM facts f
             JOIN entities e ON f.entity_id = e.id
             WHERE e.user = ?1 AND f.notified_at IS NULL
             ORDER BY f.learned_at",
        )?;
        let rows = stmt.query_map([user], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_facts_by_search_log_ids(&self, log_ids: &[i64]) -> Result<Vec<FactRow>> {
        if log_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let placeholders = vec!["?"; log_ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT {FACT_COLS} FROM facts
             WHERE source_search_log_id IN ({placeholders}) ORDER BY learned_at"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(log_ids.iter()), row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Stamp notified_at on the given facts. A notified fact never becomes
    /// un-notified.
    pub fn mark_facts_notified(&self, fact_ids: &[i64]) -> Result<()> {
        if fact_ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn();
        let placeholders = vec!["?"; fact_ids.len()].join(",");
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE facts SET notified_at = '{now}'
             WHERE id IN ({placeholders}) AND notified_at IS NULL"
        );
        conn.execute(&sql, rusqlite::params_from_iter(fact_ids.iter()))?;
        Ok(())
    }

    pub fn get_facts_without_embeddings(&self, limit: usize) -> Result<Vec<FactRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FACT_COLS} FROM facts WHERE embedding IS NULL LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update_fact_embedding(&self, id: i64, embedding: &[u8]) -> Result<()> {
        self.conn().execute(
            "UPDATE facts SET embedding = ?1 WHERE id = ?2",
            params![embedding, id],
        )?;
        Ok(())
    }

    // --- Engagements ---------------------------------------------------

    /// Append an engagement and fold its contribution into the entity's
    /// heat. A negative emoji reaction zeroes heat outright — the user told
    /// us to stop.
    pub fn add_engagement(
        &self,
        user: &str,
        entity_id: Option<i64>,
        engagement_type: EngagementType,
        valence: EngagementValence,
        strength: f64,
        source_message_id: Option<i64>,
    ) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO engagements
             (user, entity_id, engagement_type, valence, strength, source_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user,
                entity_id,
                engagement_type.as_str(),
                valence.as_str(),
                strength,
                source_message_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        if let Some(entity_id) = entity_id {
            let veto = engagement_type == EngagementType::EmojiReaction
                && valence == EngagementValence::Negative;
            if veto {
                tx.execute("UPDATE entities SET heat = 0 WHERE id = ?1", [entity_id])?;
                debug!(entity_id, "negative reaction vetoed entity heat");
            } else {
                let delta = heat_weight(engagement_type) * strength * valence.weight();
                tx.execute(
                    "UPDATE entities SET heat = MAX(heat + ?1, 0) WHERE id = ?2",
                    params![delta, entity_id],
                )?;
            }
        }
        tx.commit()?;
        Ok(id)
    }

    pub fn get_user_engagements(&self, user: &str) -> Result<Vec<EngagementRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENGAGEMENT_COLS} FROM engagements WHERE user = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([user], row_to_engagement)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_unique_per_user() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let a = store.get_or_create_entity("u", "KEF LS50 Meta").unwrap();
        let b = store.get_or_create_entity("u", "kef ls50 meta").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.name, "kef ls50 meta");

        let other = store.get_or_create_entity("v", "kef ls50 meta").unwrap();
        assert_ne!(a.id, other.id);
    }

    #[test]
    fn engagement_bumps_heat_and_veto_zeroes_it() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let e = store.get_or_create_entity("u", "genesis").unwrap();

        store
            .add_engagement(
                "u",
                Some(e.id),
                EngagementType::ExplicitStatement,
                EngagementValence::Positive,
                0.8,
                None,
            )
            .unwrap();
        let heated = store.get_entity(e.id).unwrap().unwrap();
        assert!(heated.heat > 0.0);

        store
            .add_engagement(
                "u",
                Some(e.id),
                EngagementType::EmojiReaction,
                EngagementValence::Negative,
                1.0,
                None,
            )
            .unwrap();
        let vetoed = store.get_entity(e.id).unwrap().unwrap();
        assert_eq!(vetoed.heat, 0.0);
    }

    #[test]
    fn facts_notify_once_and_never_unnotify() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let e = store.get_or_create_entity("u", "kef ls50 meta").unwrap();
        let f1 = store
            .add_fact(e.id, "Costs $1,599 per pair", None, None, None, None)
            .unwrap();

        assert_eq!(store.get_unnotified_facts("u").unwrap().len(), 1);
        store.mark_facts_notified(&[f1]).unwrap();
        assert!(store.get_unnotified_facts("u").unwrap().is_empty());

        let first = store.get_entity_facts(e.id).unwrap()[0].notified_at;
        store.mark_facts_notified(&[f1]).unwrap();
        let second = store.get_entity_facts(e.id).unwrap()[0].notified_at;
        assert_eq!(first, second);
    }

    #[test]
    fn delete_entity_cascades() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let e = store.get_or_create_entity("u", "genesis").unwrap();
        store
            .add_fact(e.id, "Formed in 1967", None, None, None, None)
            .unwrap();
        store
            .add_engagement(
                "u",
                Some(e.id),
                EngagementType::MessageMention,
                EngagementValence::Neutral,
                0.3,
                None,
            )
            .unwrap();

        store.delete_entity(e.id).unwrap();
        assert!(store.get_entity(e.id).unwrap().is_none());
        assert!(store.get_entity_facts(e.id).unwrap().is_empty());
        assert!(store.get_user_engagements("u").unwrap().is_empty());
    }

    #[test]
    fn cooldown_decrement_floors_at_zero() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let e = store.get_or_create_entity("u", "genesis").unwrap();
        store.set_heat_cooldown(e.id, 2).unwrap();
        store.decrement_heat_cooldowns("u").unwrap();
        store.decrement_heat_cooldowns("u").unwrap();
        store.decrement_heat_cooldowns("u").unwrap();
        assert_eq!(store.get_entity(e.id).unwrap().unwrap().heat_cooldown, 0);
    }
}
