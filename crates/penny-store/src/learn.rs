//! Search logs and learn prompts.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use crate::error::Result;
use crate::types::{
    parse_opt_ts, parse_ts, LearnPromptRow, LearnPromptStatus, SearchLogRow, SearchTrigger,
};
use crate::KnowledgeStore;

fn row_to_search_log(row: &Row<'_>) -> rusqlite::Result<SearchLogRow> {
    let ts: String = row.get(1)?;
    let trigger: String = row.get(5)?;
    Ok(SearchLogRow {
        id: row.get(0)?,
        timestamp: parse_ts(&ts),
        query: row.get(2)?,
        response: row.get(3)?,
        extracted: row.get(4)?,
        trigger: trigger.parse().unwrap_or(SearchTrigger::UserMessage),
        learn_prompt_id: row.get(6)?,
    })
}

fn row_to_learn_prompt(row: &Row<'_>) -> rusqlite::Result<LearnPromptRow> {
    let status: String = row.get(3)?;
    let created: String = row.get(5)?;
    let announced: Option<String> = row.get(6)?;
    Ok(LearnPromptRow {
        id: row.get(0)?,
        user: row.get(1)?,
        prompt_text: row.get(2)?,
        status: status.parse().unwrap_or(LearnPromptStatus::Active),
        searches_remaining: row.get(4)?,
        created_at: parse_ts(&created),
        announced_at: parse_opt_ts(announced),
    })
}

const SEARCH_LOG_COLS: &str =
    "id, timestamp, query, response, extracted, \"trigger\", learn_prompt_id";
const LEARN_PROMPT_COLS: &str =
    "id, user, prompt_text, status, searches_remaining, created_at, announced_at";

impl KnowledgeStore {
    pub fn log_search(
        &self,
        query: &str,
        response: &str,
        trigger: SearchTrigger,
        learn_prompt_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO search_logs (timestamp, query, response, \"trigger\", learn_prompt_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Utc::now().to_rfc3339(),
                query,
                response,
                trigger.as_str(),
                learn_prompt_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_search_log(&self, id: i64) -> Result<Option<SearchLogRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {SEARCH_LOG_COLS} FROM search_logs WHERE id = ?1"),
                [id],
                row_to_search_log,
            )
            .optional()?;
        Ok(row)
    }

    /// Un-extracted search logs, newest first, bounded.
    pub fn get_unextracted_search_logs(&self, limit: usize) -> Result<Vec<SearchLogRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SEARCH_LOG_COLS} FROM search_logs
             WHERE extracted = 0 ORDER BY timestamp DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], row_to_search_log)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// One-way transition; once extracted a log is never reprocessed.
    pub fn mark_search_extracted(&self, id: i64) -> Result<()> {
        self.conn()
            .execute("UPDATE search_logs SET extracted = 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn get_search_logs_by_learn_prompt(&self, learn_prompt_id: i64) -> Result<Vec<SearchLogRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SEARCH_LOG_COLS} FROM search_logs
             WHERE learn_prompt_id = ?1 ORDER BY timestamp"
        ))?;
        let rows = stmt.query_map([learn_prompt_id], row_to_search_log)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn create_learn_prompt(
        &self,
        user: &str,
        prompt_text: &str,
        searches: i64,
    ) -> Result<LearnPromptRow> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO learn_prompts (user, prompt_text, status, searches_remaining, created_at)
             VALUES (?1, ?2, 'active', ?3, ?4)",
            params![user, prompt_text, searches, now.to_rfc3339()],
        )?;
        Ok(LearnPromptRow {
            id: conn.last_insert_rowid(),
            user: user.to_string(),
            prompt_text: prompt_text.to_string(),
            status: LearnPromptStatus::Active,
            searches_remaining: searches,
            created_at: now,
            announced_at: None,
        })
    }

    pub fn get_learn_prompt(&self, id: i64) -> Result<Option<LearnPromptRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {LEARN_PROMPT_COLS} FROM learn_prompts WHERE id = ?1"),
                [id],
                row_to_learn_prompt,
            )
            .optional()?;
        Ok(row)
    }

    /// Oldest active learn prompt with searches remaining, if any.
    pub fn get_next_active_learn_prompt(&self, user: &str) -> Result<Option<LearnPromptRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {LEARN_PROMPT_COLS} FROM learn_prompts
                     WHERE user = ?1 AND status = 'active' AND searches_remaining > 0
                     ORDER BY created_at LIMIT 1"
                ),
                [user],
                row_to_learn_prompt,
            )
            .optional()?;
        Ok(row)
    }

    /// Decrement the search budget; flips status to completed at zero.
    /// Returns the remaining count.
    pub fn decrement_learn_searches(&self, id: i64) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "UPDATE learn_prompts
             SET searches_remaining = MAX(searches_remaining - 1, 0)
             WHERE id = ?1",
            [id],
        )?;
        let remaining: i64 = conn.query_row(
            "SELECT searches_remaining FROM learn_prompts WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            conn.execute(
                "UPDATE learn_prompts SET status = 'completed' WHERE id = ?1",
                [id],
            )?;
        }
        Ok(remaining)
    }

    pub fn get_unannounced_completed_learn_prompts(&self, user: &str) -> Result<Vec<LearnPromptRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LEARN_PROMPT_COLS} FROM learn_prompts
             WHERE user = ?1 AND status = 'completed' AND announced_at IS NULL
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([user], row_to_learn_prompt)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn mark_learn_prompt_announced(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE learn_prompts SET announced_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Delete a learn prompt and everything downstream of it: its search
    /// logs, the facts those logs produced, and any entities left with zero
    /// facts afterwards (which also drops their engagements).
    pub fn delete_learn_prompt(&self, id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let affected_entities: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT f.entity_id FROM facts f
                 JOIN search_logs s ON f.source_search_log_id = s.id
                 WHERE s.learn_prompt_id = ?1",
            )?;
            let ids = stmt
                .query_map([id], |row| row.get::<_, i64>(0))?
                .filter_map(|r| r.ok())
                .collect();
            ids
        };

        tx.execute(
            "DELETE FROM facts WHERE source_search_log_id IN
             (SELECT id FROM search_logs WHERE learn_prompt_id = ?1)",
            [id],
        )?;
        tx.execute("DELETE FROM search_logs WHERE learn_prompt_id = ?1", [id])?;

        for entity_id in affected_entities {
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM facts WHERE entity_id = ?1",
                [entity_id],
                |row| row.get(0),
            )?;
            if remaining == 0 {
                tx.execute("DELETE FROM engagements WHERE entity_id = ?1", [entity_id])?;
                tx.execute("DELETE FROM entities WHERE id = ?1", [entity_id])?;
            }
        }

        tx.execute("DELETE FROM learn_prompts WHERE id = ?1", [id])?;
        tx.commit()?;
        info!(learn_prompt_id = id, "learn prompt deleted with cascade");
        Ok(())
    }
}
