//! Message log operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::types::{parse_opt_ts, parse_ts, MessageDirection, MessageRow};
use crate::KnowledgeStore;

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let ts: String = row.get(1)?;
    let direction: String = row.get(2)?;
    Ok(MessageRow {
        id: row.get(0)?,
        timestamp: parse_ts(&ts),
        direction: direction
            .parse()
            .unwrap_or(MessageDirection::Incoming),
        sender: row.get(3)?,
        content: row.get(4)?,
        parent_id: row.get(5)?,
        signal_timestamp: row.get(6)?,
        external_id: row.get(7)?,
        is_reaction: row.get(8)?,
        processed: row.get(9)?,
    })
}

const MESSAGE_COLS: &str = "id, timestamp, direction, sender, content, parent_id, \
                            signal_timestamp, external_id, is_reaction, processed";

impl KnowledgeStore {
    /// Log a message and return its row id.
    pub fn log_message(
        &self,
        direction: MessageDirection,
        sender: &str,
        content: &str,
        parent_id: Option<i64>,
        signal_timestamp: Option<i64>,
        is_reaction: bool,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages
             (timestamp, direction, sender, content, parent_id, signal_timestamp, is_reaction)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Utc::now().to_rfc3339(),
                direction.as_str(),
                sender,
                content,
                parent_id,
                signal_timestamp,
                is_reaction,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record the platform-assigned id of an outgoing message so reactions
    /// and quote replies can be correlated later.
    pub fn set_message_external_id(&self, id: i64, external_id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET external_id = ?1 WHERE id = ?2",
            params![external_id, id],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                [id],
                row_to_message,
            )
            .optional()?;
        Ok(row)
    }

    pub fn find_message_by_external_id(&self, external_id: &str) -> Result<Option<MessageRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLS} FROM messages
                     WHERE external_id = ?1 ORDER BY id DESC LIMIT 1"
                ),
                [external_id],
                row_to_message,
            )
            .optional()?;
        Ok(row)
    }

    /// All users who have ever sent an incoming message.
    pub fn get_all_senders(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT sender FROM messages WHERE direction = 'incoming' ORDER BY sender",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Unprocessed non-reaction incoming messages for one user, newest first.
    pub fn get_unprocessed_messages(&self, sender: &str, limit: usize) -> Result<Vec<MessageRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE sender = ?1 AND direction = 'incoming'
               AND is_reaction = 0 AND processed = 0
             ORDER BY timestamp DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![sender, limit], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Unprocessed reaction messages for one user, newest first.
    pub fn get_unprocessed_reactions(&self, sender: &str, limit: usize) -> Result<Vec<MessageRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE sender = ?1 AND direction = 'incoming'
               AND is_reaction = 1 AND processed = 0
             ORDER BY timestamp DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![sender, limit], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Flip processed to true. The transition is one-way by contract.
    pub fn mark_messages_processed(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn();
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("UPDATE messages SET processed = 1 WHERE id IN ({placeholders})");
        conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(())
    }

    /// Timestamp of the user's latest real (non-command, non-reaction)
    /// incoming message. Commands don't count as engagement.
    pub fn get_latest_user_interaction_time(&self, user: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn();
        let ts: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM messages
                 WHERE sender = ?1 AND direction = 'incoming'
                   AND is_reaction = 0 AND content NOT LIKE '/%'
                 ORDER BY timestamp DESC LIMIT 1",
                [user],
                |row| row.get(0),
            )
            .optional()?;
        Ok(parse_opt_ts(ts))
    }

    /// Attribute a search to the user whose incoming message most recently
    /// preceded it. Enrichment-triggered searches have no such message and
    /// resolve through the search log's trigger instead.
    pub fn find_sender_for_timestamp(&self, ts: DateTime<Utc>) -> Result<Option<String>> {
        let conn = self.conn();
        let sender: Option<String> = conn
            .query_row(
                "SELECT sender FROM messages
                 WHERE direction = 'incoming' AND is_reaction = 0 AND timestamp <= ?1
                 ORDER BY timestamp DESC LIMIT 1",
                [ts.to_rfc3339()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(sender)
    }

    /// Whether a user has engaged with an entity (any engagement row)
    /// strictly after `since`.
    pub fn has_engagement_since(
        &self,
        user: &str,
        entity_id: i64,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM engagements
             WHERE user = ?1 AND entity_id = ?2 AND created_at > ?3",
            params![user, entity_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
