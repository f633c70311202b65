//! Research tasks and their iterations.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use crate::error::Result;
use crate::types::{parse_opt_ts, parse_ts, ResearchIterationRow, ResearchStatus, ResearchTaskRow};
use crate::KnowledgeStore;

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<ResearchTaskRow> {
    let status: String = row.get(5)?;
    let created: String = row.get(7)?;
    let completed: Option<String> = row.get(8)?;
    Ok(ResearchTaskRow {
        id: row.get(0)?,
        user: row.get(1)?,
        thread_id: row.get(2)?,
        topic: row.get(3)?,
        focus: row.get(4)?,
        status: status.parse().unwrap_or(ResearchStatus::Failed),
        max_iterations: row.get(6)?,
        created_at: parse_ts(&created),
        completed_at: parse_opt_ts(completed),
        message_id: row.get(9)?,
    })
}

fn row_to_iteration(row: &Row<'_>) -> rusqlite::Result<ResearchIterationRow> {
    let ts: String = row.get(6)?;
    Ok(ResearchIterationRow {
        id: row.get(0)?,
        research_task_id: row.get(1)?,
        iteration_num: row.get(2)?,
        query: row.get(3)?,
        findings: row.get(4)?,
        sources: row.get(5)?,
        timestamp: parse_ts(&ts),
    })
}

const TASK_COLS: &str = "id, user, thread_id, topic, focus, status, max_iterations, \
                         created_at, completed_at, message_id";
const ITER_COLS: &str =
    "id, research_task_id, iteration_num, query, findings, sources, timestamp";

impl KnowledgeStore {
    /// Create a research task. A thread with an already-active task queues
    /// the new one as pending; otherwise it starts awaiting focus.
    pub fn create_research_task(
        &self,
        user: &str,
        thread_id: &str,
        topic: &str,
        max_iterations: i64,
    ) -> Result<ResearchTaskRow> {
        let conn = self.conn();
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM research_tasks
             WHERE thread_id = ?1 AND status IN ('awaiting_focus', 'in_progress')",
            [thread_id],
            |row| row.get(0),
        )?;
        let status = if active > 0 {
            ResearchStatus::Pending
        } else {
            ResearchStatus::AwaitingFocus
        };
        conn.execute(
            "INSERT INTO research_tasks (user, thread_id, topic, status, max_iterations, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user,
                thread_id,
                topic,
                status.as_str(),
                max_iterations,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        let row = conn.query_row(
            &format!("SELECT {TASK_COLS} FROM research_tasks WHERE id = ?1"),
            [id],
            row_to_task,
        )?;
        Ok(row)
    }

    pub fn get_research_task(&self, id: i64) -> Result<Option<ResearchTaskRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {TASK_COLS} FROM research_tasks WHERE id = ?1"),
                [id],
                row_to_task,
            )
            .optional()?;
        Ok(row)
    }

    /// Oldest in-progress task across all threads.
    pub fn get_oldest_in_progress_research_task(&self) -> Result<Option<ResearchTaskRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLS} FROM research_tasks
                     WHERE status = 'in_progress' ORDER BY created_at LIMIT 1"
                ),
                [],
                row_to_task,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_research_tasks_awaiting_focus(&self) -> Result<Vec<ResearchTaskRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM research_tasks WHERE status = 'awaiting_focus'"
        ))?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn set_research_task_focus(&self, id: i64, focus: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE research_tasks SET focus = ?1, status = 'in_progress' WHERE id = ?2",
            params![focus, id],
        )?;
        Ok(())
    }

    pub fn set_research_task_status(&self, id: i64, status: ResearchStatus) -> Result<()> {
        let completed_at = matches!(status, ResearchStatus::Completed | ResearchStatus::Failed)
            .then(|| Utc::now().to_rfc3339());
        self.conn().execute(
            "UPDATE research_tasks SET status = ?1,
                 completed_at = COALESCE(?2, completed_at)
             WHERE id = ?3",
            params![status.as_str(), completed_at, id],
        )?;
        Ok(())
    }

    pub fn set_research_task_message_id(&self, id: i64, message_id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE research_tasks SET message_id = ?1 WHERE id = ?2",
            params![message_id, id],
        )?;
        Ok(())
    }

    /// Promote the oldest pending task in a thread to in-progress. Called
    /// when the thread's current task reaches a terminal state.
    pub fn activate_next_pending_research_task(&self, thread_id: &str) -> Result<Option<i64>> {
        let conn = self.conn();
        let next: Option<i64> = conn
            .query_row(
                "SELECT id FROM research_tasks
                 WHERE thread_id = ?1 AND status = 'pending'
                 ORDER BY created_at LIMIT 1",
                [thread_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = next {
            conn.execute(
                "UPDATE research_tasks SET status = 'in_progress' WHERE id = ?1",
                [id],
            )?;
            info!(task_id = id, "activated pending research task");
        }
        Ok(next)
    }

    pub fn add_research_iteration(
        &self,
        task_id: i64,
        iteration_num: i64,
        query: &str,
        findings: &str,
        sources: &[String],
    ) -> Result<i64> {
        let conn = self.conn();
        let sources_json = serde_json::to_string(sources).unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            "INSERT INTO research_iterations
             (research_task_id, iteration_num, query, findings, sources, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task_id,
                iteration_num,
                query,
                findings,
                sources_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_research_iterations(&self, task_id: i64) -> Result<Vec<ResearchIterationRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITER_COLS} FROM research_iterations
             WHERE research_task_id = ?1 ORDER BY iteration_num"
        ))?;
        let rows = stmt.query_map([task_id], row_to_iteration)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_task_in_thread_queues_as_pending() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let first = store.create_research_task("u", "t1", "topic a", 5).unwrap();
        assert_eq!(first.status, ResearchStatus::AwaitingFocus);
        let second = store.create_research_task("u", "t1", "topic b", 5).unwrap();
        assert_eq!(second.status, ResearchStatus::Pending);
    }

    #[test]
    fn completion_activates_next_pending() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let first = store.create_research_task("u", "t1", "topic a", 5).unwrap();
        let second = store.create_research_task("u", "t1", "topic b", 5).unwrap();

        store
            .set_research_task_status(first.id, ResearchStatus::Completed)
            .unwrap();
        let activated = store.activate_next_pending_research_task("t1").unwrap();
        assert_eq!(activated, Some(second.id));
        assert_eq!(
            store.get_research_task(second.id).unwrap().unwrap().status,
            ResearchStatus::InProgress
        );
    }

    #[test]
    fn iterations_ordered() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let task = store.create_research_task("u", "t1", "topic", 3).unwrap();
        store
            .add_research_iteration(task.id, 1, "q1", "draft one", &["https://a".into()])
            .unwrap();
        store
            .add_research_iteration(task.id, 2, "q2", "draft two", &[])
            .unwrap();
        let iters = store.get_research_iterations(task.id).unwrap();
        assert_eq!(iters.len(), 2);
        assert_eq!(iters[1].findings, "draft two");
        assert_eq!(iters[0].parsed_sources(), vec!["https://a".to_string()]);
    }
}
