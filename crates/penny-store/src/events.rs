//! Events and follow prompts (news subscriptions).

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::types::{
    parse_opt_ts, parse_ts, EventRow, FollowPromptRow, FollowPromptStatus,
};
use crate::KnowledgeStore;

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    let occurred: String = row.get(4)?;
    let discovered: String = row.get(5)?;
    let notified: Option<String> = row.get(8)?;
    Ok(EventRow {
        id: row.get(0)?,
        user: row.get(1)?,
        headline: row.get(2)?,
        summary: row.get(3)?,
        occurred_at: parse_ts(&occurred),
        discovered_at: parse_ts(&discovered),
        source_url: row.get(6)?,
        external_id: row.get(7)?,
        notified_at: parse_opt_ts(notified),
        embedding: row.get(9)?,
        follow_prompt_id: row.get(10)?,
    })
}

fn row_to_follow_prompt(row: &Row<'_>) -> rusqlite::Result<FollowPromptRow> {
    let status: String = row.get(3)?;
    let created: String = row.get(8)?;
    let polled: Option<String> = row.get(9)?;
    let notified: Option<String> = row.get(10)?;
    Ok(FollowPromptRow {
        id: row.get(0)?,
        user: row.get(1)?,
        prompt_text: row.get(2)?,
        status: status.parse().unwrap_or(FollowPromptStatus::Active),
        query_terms: row.get(4)?,
        cron_expression: row.get(5)?,
        timing_description: row.get(6)?,
        user_timezone: row.get(7)?,
        created_at: parse_ts(&created),
        last_polled_at: parse_opt_ts(polled),
        last_notified_at: parse_opt_ts(notified),
    })
}

const EVENT_COLS: &str = "id, user, headline, summary, occurred_at, discovered_at, \
                          source_url, external_id, notified_at, embedding, follow_prompt_id";
const FOLLOW_COLS: &str = "id, user, prompt_text, status, query_terms, cron_expression, \
                           timing_description, user_timezone, created_at, last_polled_at, \
                           last_notified_at";

impl KnowledgeStore {
    /// Create an event. Returns `None` when an event with the same
    /// `external_id` already exists for this user (URL-level dedup backstop).
    pub fn add_event(
        &self,
        user: &str,
        headline: &str,
        summary: &str,
        occurred_at: DateTime<Utc>,
        source_url: Option<&str>,
        external_id: Option<&str>,
        follow_prompt_id: Option<i64>,
    ) -> Result<Option<EventRow>> {
        let conn = self.conn();
        if let Some(ext) = external_id {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT id FROM events WHERE user = ?1 AND external_id = ?2",
                    params![user, ext],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Ok(None);
            }
        }
        conn.execute(
            "INSERT INTO events
             (user, headline, summary, occurred_at, discovered_at, source_url,
              external_id, follow_prompt_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user,
                headline,
                summary,
                occurred_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                source_url,
                external_id,
                follow_prompt_id,
            ],
        )?;
        let id = conn.last_insert_rowid();
        let row = conn.query_row(
            &format!("SELECT {EVENT_COLS} FROM events WHERE id = ?1"),
            [id],
            row_to_event,
        )?;
        Ok(Some(row))
    }

    /// Events discovered within the last `days` for dedup comparison.
    pub fn get_recent_events(&self, user: &str, days: i64) -> Result<Vec<EventRow>> {
        let conn = self.conn();
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM events
             WHERE user = ?1 AND discovered_at >= ?2
             ORDER BY discovered_at DESC"
        ))?;
        let rows = stmt.query_map(params![user, cutoff], row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_unnotified_events_for_prompt(&self, follow_prompt_id: i64) -> Result<Vec<EventRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM events
             WHERE follow_prompt_id = ?1 AND notified_at IS NULL
             ORDER BY occurred_at"
        ))?;
        let rows = stmt.query_map([follow_prompt_id], row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn mark_events_notified(&self, event_ids: &[i64]) -> Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn();
        let placeholders = vec!["?"; event_ids.len()].join(",");
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE events SET notified_at = '{now}'
             WHERE id IN ({placeholders}) AND notified_at IS NULL"
        );
        conn.execute(&sql, rusqlite::params_from_iter(event_ids.iter()))?;
        Ok(())
    }

    pub fn update_event_embedding(&self, id: i64, embedding: &[u8]) -> Result<()> {
        self.conn().execute(
            "UPDATE events SET embedding = ?1 WHERE id = ?2",
            params![embedding, id],
        )?;
        Ok(())
    }

    // --- Follow prompts ------------------------------------------------

    pub fn create_follow_prompt(
        &self,
        user: &str,
        prompt_text: &str,
        query_terms: &[String],
        cron_expression: &str,
        timing_description: &str,
        user_timezone: &str,
    ) -> Result<FollowPromptRow> {
        let conn = self.conn();
        let terms = serde_json::to_string(query_terms).unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            "INSERT INTO follow_prompts
             (user, prompt_text, status, query_terms, cron_expression,
              timing_description, user_timezone, created_at)
             VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?6, ?7)",
            params![
                user,
                prompt_text,
                terms,
                cron_expression,
                timing_description,
                user_timezone,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        let row = conn.query_row(
            &format!("SELECT {FOLLOW_COLS} FROM follow_prompts WHERE id = ?1"),
            [id],
            row_to_follow_prompt,
        )?;
        Ok(row)
    }

    /// Active follow prompts in poll-priority order: never-polled first,
    /// then stalest.
    pub fn get_active_follow_prompts_by_poll_priority(&self) -> Result<Vec<FollowPromptRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FOLLOW_COLS} FROM follow_prompts
             WHERE status = 'active'
             ORDER BY last_polled_at IS NOT NULL, last_polled_at"
        ))?;
        let rows = stmt.query_map([], row_to_follow_prompt)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_active_follow_prompts_for_user(&self, user: &str) -> Result<Vec<FollowPromptRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FOLLOW_COLS} FROM follow_prompts
             WHERE user = ?1 AND status = 'active' ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([user], row_to_follow_prompt)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update_follow_prompt_last_polled(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE follow_prompts SET last_polled_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn update_follow_prompt_last_notified(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE follow_prompts SET last_notified_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_external_id_dedup_backstop() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let now = Utc::now();
        let first = store
            .add_event("u", "SpaceX launches", "…", now, None, Some("https://x/1"), None)
            .unwrap();
        assert!(first.is_some());
        let dup = store
            .add_event("u", "SpaceX launches again", "…", now, None, Some("https://x/1"), None)
            .unwrap();
        assert!(dup.is_none());
        assert_eq!(store.get_recent_events("u", 7).unwrap().len(), 1);
    }

    #[test]
    fn poll_priority_orders_stalest_first() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let a = store
            .create_follow_prompt("u", "ai news", &[], "0 9 * * *", "daily", "UTC")
            .unwrap();
        let b = store
            .create_follow_prompt("u", "space news", &[], "0 9 * * *", "daily", "UTC")
            .unwrap();

        store.update_follow_prompt_last_polled(a.id).unwrap();
        let order = store.get_active_follow_prompts_by_poll_priority().unwrap();
        assert_eq!(order[0].id, b.id, "never-polled prompt goes first");
        assert_eq!(order[1].id, a.id);
    }

    #[test]
    fn unnotified_events_per_prompt() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let fp = store
            .create_follow_prompt("u", "ai news", &[], "0 9 * * *", "daily", "UTC")
            .unwrap();
        let ev = store
            .add_event("u", "headline", "…", Utc::now(), None, Some("https://x/2"), Some(fp.id))
            .unwrap()
            .unwrap();
        assert_eq!(store.get_unnotified_events_for_prompt(fp.id).unwrap().len(), 1);
        store.mark_events_notified(&[ev.id]).unwrap();
        assert!(store.get_unnotified_events_for_prompt(fp.id).unwrap().is_empty());
    }
}
