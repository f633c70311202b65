//! Per-user profile info.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::types::UserInfoRow;
use crate::KnowledgeStore;

fn row_to_user_info(row: &Row<'_>) -> rusqlite::Result<UserInfoRow> {
    Ok(UserInfoRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        name: row.get(2)?,
        location: row.get(3)?,
        timezone: row.get(4)?,
        date_of_birth: row.get(5)?,
    })
}

impl KnowledgeStore {
    /// Insert or replace a user's profile. The timezone is derived from the
    /// location by the caller before the write lands here.
    pub fn upsert_user_info(
        &self,
        sender: &str,
        name: &str,
        location: &str,
        timezone: &str,
        date_of_birth: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO user_info (sender, name, location, timezone, date_of_birth,
                                    created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(sender) DO UPDATE SET
                 name = excluded.name,
                 location = excluded.location,
                 timezone = excluded.timezone,
                 date_of_birth = excluded.date_of_birth,
                 updated_at = excluded.updated_at",
            params![sender, name, location, timezone, date_of_birth, now],
        )?;
        Ok(())
    }

    pub fn get_user_info(&self, sender: &str) -> Result<Option<UserInfoRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, sender, name, location, timezone, date_of_birth
                 FROM user_info WHERE sender = ?1",
                [sender],
                row_to_user_info,
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        store
            .upsert_user_info("+1555", "Ada", "London", "Europe/London", "1990-12-10")
            .unwrap();
        store
            .upsert_user_info("+1555", "Ada", "Paris", "Europe/Paris", "1990-12-10")
            .unwrap();
        let info = store.get_user_info("+1555").unwrap().unwrap();
        assert_eq!(info.location, "Paris");
        assert_eq!(info.timezone, "Europe/Paris");
    }
}
