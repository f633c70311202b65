use rusqlite::Connection;

use crate::error::Result;

/// Initialise all tables. Safe to call on every startup (idempotent).
/// Schema changes are forward-only: new columns are added via
/// `ALTER TABLE ... ADD COLUMN` guarded by a catalog check.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp        TEXT NOT NULL,
            direction        TEXT NOT NULL,
            sender           TEXT NOT NULL,
            content          TEXT NOT NULL,
            parent_id        INTEGER REFERENCES messages(id),
            signal_timestamp INTEGER,
            external_id      TEXT,
            is_reaction      INTEGER NOT NULL DEFAULT 0,
            processed        INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_external ON messages(external_id);
        CREATE INDEX IF NOT EXISTS idx_messages_unprocessed
            ON messages(processed, direction, is_reaction);

        CREATE TABLE IF NOT EXISTS search_logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp       TEXT NOT NULL,
            query           TEXT NOT NULL,
            response        TEXT NOT NULL,
            extracted       INTEGER NOT NULL DEFAULT 0,
            \"trigger\"       TEXT NOT NULL DEFAULT 'user_message',
            learn_prompt_id INTEGER REFERENCES learn_prompts(id)
        );
        CREATE INDEX IF NOT EXISTS idx_search_logs_extracted ON search_logs(extracted);
        CREATE INDEX IF NOT EXISTS idx_search_logs_learn ON search_logs(learn_prompt_id);

        CREATE TABLE IF NOT EXISTS learn_prompts (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            user               TEXT NOT NULL,
            prompt_text        TEXT NOT NULL,
            status             TEXT NOT NULL DEFAULT 'active',
            searches_remaining INTEGER NOT NULL DEFAULT 0,
            created_at         TEXT NOT NULL,
            announced_at       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_learn_prompts_user ON learn_prompts(user, status);

        CREATE TABLE IF NOT EXISTS entities (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            user             TEXT NOT NULL,
            name             TEXT NOT NULL,
            tagline          TEXT,
            embedding        BLOB,
            heat             REAL NOT NULL DEFAULT 0,
            heat_cooldown    INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            last_enriched_at TEXT,
            last_notified_at TEXT,
            UNIQUE(user, name)
        );
        CREATE INDEX IF NOT EXISTS idx_entities_user ON entities(user);

        CREATE TABLE IF NOT EXISTS facts (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id            INTEGER NOT NULL REFERENCES entities(id),
            content              TEXT NOT NULL,
            source_url           TEXT,
            source_search_log_id INTEGER REFERENCES search_logs(id),
            source_message_id    INTEGER REFERENCES messages(id),
            learned_at           TEXT NOT NULL,
            notified_at          TEXT,
            embedding            BLOB
        );
        CREATE INDEX IF NOT EXISTS idx_facts_entity ON facts(entity_id);
        CREATE INDEX IF NOT EXISTS idx_facts_search_log ON facts(source_search_log_id);
        CREATE INDEX IF NOT EXISTS idx_facts_unnotified ON facts(notified_at);

        CREATE TABLE IF NOT EXISTS engagements (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            user              TEXT NOT NULL,
            entity_id         INTEGER REFERENCES entities(id),
            engagement_type   TEXT NOT NULL,
            valence           TEXT NOT NULL,
            strength          REAL NOT NULL,
            source_message_id INTEGER REFERENCES messages(id),
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_engagements_user ON engagements(user, created_at);
        CREATE INDEX IF NOT EXISTS idx_engagements_entity ON engagements(entity_id);

        CREATE TABLE IF NOT EXISTS preferences (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user       TEXT NOT NULL,
            topic      TEXT NOT NULL,
            pref_type  TEXT NOT NULL,
            embedding  BLOB,
            created_at TEXT NOT NULL,
            UNIQUE(user, topic)
        );
        CREATE INDEX IF NOT EXISTS idx_preferences_user ON preferences(user, pref_type);

        CREATE TABLE IF NOT EXISTS events (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            user             TEXT NOT NULL,
            headline         TEXT NOT NULL,
            summary          TEXT NOT NULL,
            occurred_at      TEXT NOT NULL,
            discovered_at    TEXT NOT NULL,
            source_url       TEXT,
            external_id      TEXT,
            notified_at      TEXT,
            embedding        BLOB,
            follow_prompt_id INTEGER REFERENCES follow_prompts(id)
        );
        CREATE INDEX IF NOT EXISTS idx_events_user ON events(user, discovered_at DESC);
        CREATE INDEX IF NOT EXISTS idx_events_external ON events(user, external_id);
        CREATE INDEX IF NOT EXISTS idx_events_prompt ON events(follow_prompt_id, notified_at);

        CREATE TABLE IF NOT EXISTS follow_prompts (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            user               TEXT NOT NULL,
            prompt_text        TEXT NOT NULL,
            status             TEXT NOT NULL DEFAULT 'active',
            query_terms        TEXT NOT NULL DEFAULT '[]',
            cron_expression    TEXT NOT NULL DEFAULT '0 9 * * *',
            timing_description TEXT NOT NULL DEFAULT 'daily',
            user_timezone      TEXT NOT NULL DEFAULT 'UTC',
            created_at         TEXT NOT NULL,
            last_polled_at     TEXT,
            last_notified_at   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_follow_prompts_user ON follow_prompts(user, status);

        CREATE TABLE IF NOT EXISTS user_info (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            sender        TEXT NOT NULL UNIQUE,
            name          TEXT NOT NULL,
            location      TEXT NOT NULL,
            timezone      TEXT NOT NULL,
            date_of_birth TEXT NOT NULL,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS research_tasks (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            user           TEXT NOT NULL,
            thread_id      TEXT NOT NULL,
            topic          TEXT NOT NULL,
            focus          TEXT,
            status         TEXT NOT NULL DEFAULT 'awaiting_focus',
            max_iterations INTEGER NOT NULL DEFAULT 10,
            created_at     TEXT NOT NULL,
            completed_at   TEXT,
            message_id     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_research_tasks_status ON research_tasks(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_research_tasks_thread ON research_tasks(thread_id);

        CREATE TABLE IF NOT EXISTS research_iterations (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            research_task_id INTEGER NOT NULL REFERENCES research_tasks(id),
            iteration_num    INTEGER NOT NULL,
            query            TEXT NOT NULL,
            findings         TEXT NOT NULL,
            sources          TEXT NOT NULL DEFAULT '[]',
            timestamp        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_research_iterations_task
            ON research_iterations(research_task_id, iteration_num);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }
}
