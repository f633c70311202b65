//! User preference topics (likes and dislikes).
//!
//! A topic lives in exactly one of the two lists per user. Toggling moves
//! the row between lists inside one transaction rather than duplicating it.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use crate::error::Result;
use crate::types::{parse_ts, PreferenceRow, PreferenceType};
use crate::KnowledgeStore;

fn row_to_preference(row: &Row<'_>) -> rusqlite::Result<PreferenceRow> {
    let pref_type: String = row.get(3)?;
    let created: String = row.get(5)?;
    Ok(PreferenceRow {
        id: row.get(0)?,
        user: row.get(1)?,
        topic: row.get(2)?,
        pref_type: pref_type.parse().unwrap_or(PreferenceType::Like),
        embedding: row.get(4)?,
        created_at: parse_ts(&created),
    })
}

const PREF_COLS: &str = "id, user, topic, pref_type, embedding, created_at";

impl KnowledgeStore {
    /// Add a preference topic for a user.
    ///
    /// Returns `None` when the topic already exists with the same type
    /// (no duplicate row). When the topic exists with the opposite type the
    /// row is moved and the moved row is returned.
    pub fn add_preference(
        &self,
        user: &str,
        topic: &str,
        pref_type: PreferenceType,
        embedding: Option<&[u8]>,
    ) -> Result<Option<PreferenceRow>> {
        let topic = topic.trim().to_lowercase();
        if topic.is_empty() {
            return Ok(None);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, pref_type FROM preferences WHERE user = ?1 AND topic = ?2",
                params![user, topic],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let id = match existing {
            Some((_, ref t)) if t == pref_type.as_str() => {
                tx.commit()?;
                return Ok(None);
            }
            Some((id, _)) => {
                // Opposite list — move, don't duplicate.
                tx.execute(
                    "UPDATE preferences SET pref_type = ?1, embedding = ?2 WHERE id = ?3",
                    params![pref_type.as_str(), embedding, id],
                )?;
                info!(%user, %topic, to = %pref_type, "preference moved between lists");
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO preferences (user, topic, pref_type, embedding, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![user, topic, pref_type.as_str(), embedding, Utc::now().to_rfc3339()],
                )?;
                tx.last_insert_rowid()
            }
        };

        let row = tx.query_row(
            &format!("SELECT {PREF_COLS} FROM preferences WHERE id = ?1"),
            [id],
            row_to_preference,
        )?;
        tx.commit()?;
        Ok(Some(row))
    }

    pub fn get_preferences(&self, user: &str, pref_type: PreferenceType) -> Result<Vec<PreferenceRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PREF_COLS} FROM preferences
             WHERE user = ?1 AND pref_type = ?2 ORDER BY topic"
        ))?;
        let rows = stmt.query_map(params![user, pref_type.as_str()], row_to_preference)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_preferences_without_embeddings(&self, limit: usize) -> Result<Vec<PreferenceRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PREF_COLS} FROM preferences WHERE embedding IS NULL LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], row_to_preference)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update_preference_embedding(&self, id: i64, embedding: &[u8]) -> Result<()> {
        self.conn().execute(
            "UPDATE preferences SET embedding = ?1 WHERE id = ?2",
            params![embedding, id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_type_is_no_duplicate() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let first = store
            .add_preference("u", "jazz", PreferenceType::Like, None)
            .unwrap();
        assert!(first.is_some());
        let second = store
            .add_preference("u", "Jazz", PreferenceType::Like, None)
            .unwrap();
        assert!(second.is_none());
        assert_eq!(store.get_preferences("u", PreferenceType::Like).unwrap().len(), 1);
    }

    #[test]
    fn toggle_moves_between_lists() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        store
            .add_preference("u", "jazz", PreferenceType::Like, None)
            .unwrap();
        let moved = store
            .add_preference("u", "jazz", PreferenceType::Dislike, None)
            .unwrap()
            .unwrap();
        assert_eq!(moved.pref_type, PreferenceType::Dislike);

        assert!(store.get_preferences("u", PreferenceType::Like).unwrap().is_empty());
        let dislikes = store.get_preferences("u", PreferenceType::Dislike).unwrap();
        assert_eq!(dislikes.len(), 1);
        assert_eq!(dislikes[0].topic, "jazz");
    }
}
