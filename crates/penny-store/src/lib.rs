//! Penny's knowledge store: messages, search logs, learn prompts, entities,
//! facts, engagements, preferences, events, follow prompts, user info, and
//! research tasks over a single SQLite database.
//!
//! All access goes through [`KnowledgeStore`], which serializes writes behind
//! a connection mutex. Multi-row updates (cascades, preference toggles) run
//! inside explicit transactions so a cancelled agent can never leave a
//! half-applied change behind.

use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

pub mod db;
pub mod entities;
pub mod error;
pub mod events;
pub mod learn;
pub mod messages;
pub mod preferences;
pub mod research;
pub mod types;
pub mod users;

pub use error::{Result, StoreError};
pub use types::*;

pub struct KnowledgeStore {
    conn: Mutex<Connection>,
}

impl KnowledgeStore {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Open(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Open(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_file_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("penny.db").to_string_lossy().to_string();

        let store = KnowledgeStore::open(&path).unwrap();
        store
            .log_message(types::MessageDirection::Incoming, "u", "hello", None, None, false)
            .unwrap();
        drop(store);

        // Rows survive a reopen; schema init is idempotent.
        let store = KnowledgeStore::open(&path).unwrap();
        assert_eq!(store.get_all_senders().unwrap(), vec!["u".to_string()]);
    }
}
