//! The Task Store: durable queue + event log over a single-file,
//! write-ahead-logged SQLite database. The only stateful component — every
//! other component is handed an `Arc<TaskStore>` and talks to it instead of
//! holding its own copy of task state.

pub mod model;

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::{Row, SqlitePool as Pool};

use crate::error::{HearthError, Result};
pub use model::{
    Interaction, Priority, Task, TaskLogEntry, TaskLogEvent, TaskStatus, TaskSummary, TaskType, UserFact,
};

const MIGRATIONS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    task_type TEXT NOT NULL,
    priority INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    scheduled_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    result_summary TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 2,
    parent_id INTEGER,
    tags TEXT NOT NULL DEFAULT '[]',
    context TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_eligible ON tasks (status, scheduled_at, priority, created_at);

CREATE TABLE IF NOT EXISTS task_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    event TEXT NOT NULL,
    detail TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_log_task_id ON task_log (task_id);

CREATE TABLE IF NOT EXISTS interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    user_input TEXT NOT NULL,
    intent_json TEXT NOT NULL,
    model_used TEXT NOT NULL,
    output TEXT NOT NULL,
    success INTEGER NOT NULL,
    tool_calls INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fact TEXT NOT NULL,
    confidence REAL NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS skills_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    skill_name TEXT NOT NULL,
    args TEXT NOT NULL,
    result TEXT NOT NULL,
    success INTEGER NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Durable queue + event log, backed by a single SQLite file opened in
/// write-ahead-log journal mode. All methods serialize through the pool's
/// own transaction machinery; readers may proceed concurrently.
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Open (creating if absent) the database at `path`, run migrations,
    /// and seed the bootstrap task set on first open.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(HearthError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = Pool::connect_with(options)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;

        sqlx::raw_sql(MIGRATIONS_SQL)
            .execute(&pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;

        let store = Self { pool };
        store.seed_if_empty().await?;
        Ok(store)
    }

    /// In-memory database, for tests: `sqlite::memory:`.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| HearthError::StoreError(e.to_string()))?;
        let pool = Pool::connect_with(options)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;
        sqlx::raw_sql(MIGRATIONS_SQL)
            .execute(&pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;
        let store = Self { pool };
        store.seed_if_empty().await?;
        Ok(store)
    }

    async fn seed_if_empty(&self) -> Result<()> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM tasks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;
        let count: i64 = row.get("c");
        if count > 0 {
            return Ok(());
        }

        let bootstrap: &[(&str, &str, TaskType, Priority)] = &[
            (
                "Introduce yourself",
                "Review the personality configuration and prepare a short self-introduction for the user's first session.",
                TaskType::Prepare,
                Priority::High,
            ),
            (
                "Inventory available skills",
                "List the skills currently registered and note any that look broken or redundant.",
                TaskType::SelfImprove,
                Priority::Normal,
            ),
            (
                "Warm up semantic memory",
                "Check whether the semantic memory leaf has any entries yet; if empty, note that as a fact.",
                TaskType::Maintain,
                Priority::Low,
            ),
        ];

        for (title, description, task_type, priority) in bootstrap {
            self.add(
                title,
                description,
                *task_type,
                *priority,
                None,
                Vec::new(),
                HashMap::new(),
                None,
                2,
            )
            .await?;
        }
        Ok(())
    }

    /// Insert a new task row. `scheduled_at` defaults to now.
    #[allow(clippy::too_many_arguments)]
    pub async fn add(
        &self,
        title: &str,
        description: &str,
        task_type: TaskType,
        priority: Priority,
        scheduled_at: Option<DateTime<Utc>>,
        tags: Vec<String>,
        context: HashMap<String, serde_json::Value>,
        parent_id: Option<i64>,
        max_retries: u32,
    ) -> Result<i64> {
        let now = Utc::now();
        let scheduled_at = scheduled_at.unwrap_or(now);
        let tags_json = serde_json::to_string(&tags)?;
        let context_json = serde_json::to_string(&context)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO tasks (title, description, task_type, priority, status, created_at, \
             scheduled_at, retry_count, max_retries, parent_id, tags, context, updated_at) \
             VALUES (?, ?, ?, ?, 'pending', ?, ?, 0, ?, ?, ?, ?, ?)",
        )
        .bind(title)
        .bind(description)
        .bind(task_type.to_string())
        .bind(priority.as_i32())
        .bind(now.to_rfc3339())
        .bind(scheduled_at.to_rfc3339())
        .bind(max_retries)
        .bind(parent_id)
        .bind(tags_json)
        .bind(context_json)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        let id = result.last_insert_rowid();

        sqlx::query(
            "INSERT INTO task_log (task_id, timestamp, event, detail) VALUES (?, ?, 'created', ?)",
        )
        .bind(id)
        .bind(now.to_rfc3339())
        .bind(title)
        .execute(&mut *tx)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        tx.commit().await.map_err(|e| HearthError::StoreError(e.to_string()))?;
        Ok(id)
    }

    /// Selects the eligible task (`status = pending ∧ scheduled_at ≤ now`)
    /// with the smallest priority value, breaking ties by oldest
    /// `created_at`. Pure read; does not claim.
    pub async fn next_pending(&self) -> Result<Option<Task>> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query(
            "SELECT * FROM tasks WHERE status = 'pending' AND scheduled_at <= ? \
             ORDER BY priority ASC, created_at ASC LIMIT 1",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        row.map(|r| row_to_task(&r)).transpose()
    }

    /// `pending -> running`. Uses `UPDATE ... WHERE status = 'pending'` as
    /// the claim; if zero rows change, the task was raced by a concurrent
    /// claimant and this call fails.
    pub async fn start(&self, id: i64) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'running', started_at = ?, updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(HearthError::InvalidTransition {
                reason: format!("task {id} is not pending (claim raced or missing)"),
            });
        }

        self.log(id, TaskLogEvent::Started, "").await
    }

    /// `running -> done`. Summary is truncated to 1000 chars.
    pub async fn complete(&self, id: i64, summary: &str) -> Result<()> {
        let summary = truncate_chars(summary, 1000);
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'done', completed_at = ?, result_summary = ?, updated_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(now.to_rfc3339())
        .bind(&summary)
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        // A concurrent complete on a row no longer running is a no-op, not
        // an error — pause_running() may have already reclaimed the row.
        if result.rows_affected() == 0 {
            return Ok(());
        }

        self.log(id, TaskLogEvent::Completed, &summary).await
    }

    /// `running -> pending` with exponential backoff while retries remain,
    /// else `running -> failed`.
    pub async fn fail(&self, id: i64, reason: &str) -> Result<()> {
        let task = self
            .get(id)
            .await?
            .ok_or(HearthError::TaskNotFound(id))?;

        if task.status != TaskStatus::Running {
            return Ok(());
        }

        let now = Utc::now();
        if task.retry_count < task.max_retries {
            let backoff_minutes = 5 * 2i64.pow(task.retry_count);
            let scheduled_at = now + ChronoDuration::minutes(backoff_minutes);
            let retry_count = task.retry_count + 1;

            sqlx::query(
                "UPDATE tasks SET status = 'pending', retry_count = ?, scheduled_at = ?, \
                 started_at = NULL, updated_at = ? WHERE id = ? AND status = 'running'",
            )
            .bind(retry_count)
            .bind(scheduled_at.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;

            self.log(id, TaskLogEvent::RetryScheduled, reason).await
        } else {
            sqlx::query(
                "UPDATE tasks SET status = 'failed', completed_at = ?, result_summary = ?, \
                 updated_at = ? WHERE id = ? AND status = 'running'",
            )
            .bind(now.to_rfc3339())
            .bind(truncate_chars(reason, 1000))
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;

            self.log(id, TaskLogEvent::Failed, reason).await
        }
    }

    /// Any non-terminal status -> cancelled.
    pub async fn cancel(&self, id: i64, reason: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'cancelled', completed_at = ?, result_summary = ?, \
             updated_at = ? WHERE id = ? AND status NOT IN ('done', 'failed', 'cancelled')",
        )
        .bind(now.to_rfc3339())
        .bind(truncate_chars(reason, 1000))
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(());
        }
        self.log(id, TaskLogEvent::Cancelled, reason).await
    }

    /// Forces `pending` with a new `scheduled_at`, regardless of current
    /// status (other than terminal states already reached).
    pub async fn reschedule(&self, id: i64, when: DateTime<Utc>) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE tasks SET status = 'pending', scheduled_at = ?, started_at = NULL, \
             updated_at = ? WHERE id = ?",
        )
        .bind(when.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        self.log(id, TaskLogEvent::Rescheduled, &when.to_rfc3339()).await
    }

    /// Atomic bulk update: every `running` row returns to `pending` with
    /// `started_at = NULL`. Invoked when the user pre-empts the heartbeat.
    /// Returns the number of rows reclaimed.
    pub async fn pause_running(&self) -> Result<u64> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;

        let ids: Vec<i64> = sqlx::query("SELECT id FROM tasks WHERE status = 'running'")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?
            .into_iter()
            .map(|r| r.get("id"))
            .collect();

        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', started_at = NULL, updated_at = ? \
             WHERE status = 'running'",
        )
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        for id in &ids {
            sqlx::query(
                "INSERT INTO task_log (task_id, timestamp, event, detail) \
                 VALUES (?, ?, 'rescheduled', 'paused for user activity')",
            )
            .bind(id)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| HearthError::StoreError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM tasks WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;
        let count: i64 = row.get("c");
        Ok(count as u64)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;
        row.map(|r| row_to_task(&r)).transpose()
    }

    pub async fn get_all(&self, status: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM tasks WHERE status = ? ORDER BY created_at DESC LIMIT ?")
                    .bind(status.to_string())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM tasks ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        rows.iter().map(row_to_task).collect()
    }

    pub async fn get_recent_completed(&self, n: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status = 'done' ORDER BY completed_at DESC LIMIT ?",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        rows.iter().map(row_to_task).collect()
    }

    pub async fn summary(&self) -> Result<TaskSummary> {
        let rows = sqlx::query("SELECT status, COUNT(*) as c FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;

        let mut summary = TaskSummary::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("c");
            match status.as_str() {
                "pending" => summary.pending = count as u64,
                "running" => summary.running = count as u64,
                "done" => summary.done = count as u64,
                "failed" => summary.failed = count as u64,
                "cancelled" => summary.cancelled = count as u64,
                _ => {}
            }
        }
        Ok(summary)
    }

    /// Read the audit trail for a task, oldest first.
    pub async fn log_for(&self, task_id: i64) -> Result<Vec<TaskLogEntry>> {
        let rows = sqlx::query("SELECT * FROM task_log WHERE task_id = ? ORDER BY id ASC")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let timestamp: String = row.get("timestamp");
                let event: String = row.get("event");
                Ok(TaskLogEntry {
                    task_id: row.get("task_id"),
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map_err(|e| HearthError::StoreError(e.to_string()))?
                        .with_timezone(&Utc),
                    event: TaskLogEvent::from_str(&event).map_err(HearthError::StoreError)?,
                    detail: row.get("detail"),
                })
            })
            .collect()
    }

    /// Append-only write: the Executor writes exactly one on completion.
    pub async fn record_interaction(&self, interaction: &Interaction) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO interactions (timestamp, user_input, intent_json, model_used, output, \
             success, tool_calls, duration_ms) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(interaction.timestamp.to_rfc3339())
        .bind(&interaction.user_input)
        .bind(interaction.intent_json.to_string())
        .bind(&interaction.model_used)
        .bind(&interaction.output)
        .bind(interaction.success)
        .bind(interaction.tool_calls)
        .bind(interaction.duration_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    /// Records one observation about the user, used by `/profile` and by
    /// whatever skill or Executor path chooses to log a fact mid-turn.
    pub async fn log_user_fact(&self, fact: &str, confidence: f32, source: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO user_facts (fact, confidence, source, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(fact)
        .bind(confidence)
        .bind(source)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent facts first; backs `GET /profile`.
    pub async fn list_user_facts(&self, limit: i64) -> Result<Vec<UserFact>> {
        let rows = sqlx::query("SELECT * FROM user_facts ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let created_at: String = row.get("created_at");
                Ok(UserFact {
                    id: row.get("id"),
                    fact: row.get("fact"),
                    confidence: row.get("confidence"),
                    source: row.get("source"),
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map_err(|e| HearthError::StoreError(e.to_string()))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }

    /// Upserts one `key -> value` preference; backs `/profile`'s view of
    /// durable user preferences and whatever skill writes them.
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_preferences (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;
        Ok(())
    }

    pub async fn list_preferences(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM user_preferences")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| HearthError::StoreError(e.to_string()))?;
        Ok(rows.into_iter().map(|row| (row.get("key"), row.get("value"))).collect())
    }

    async fn log(&self, task_id: i64, event: TaskLogEvent, detail: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_log (task_id, timestamp, event, detail) VALUES (?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(Utc::now().to_rfc3339())
        .bind(event.to_string())
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(|e| HearthError::StoreError(e.to_string()))?;
        Ok(())
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max.saturating_sub(15)).collect();
    format!("{truncated}...[truncated]")
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
    let parse_ts = |s: String| -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| HearthError::StoreError(e.to_string()))
    };
    let parse_opt_ts = |s: Option<String>| -> Result<Option<DateTime<Utc>>> {
        s.map(parse_ts).transpose()
    };

    let task_type: String = row.get("task_type");
    let status: String = row.get("status");
    let tags_json: String = row.get("tags");
    let context_json: String = row.get("context");

    Ok(Task {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        task_type: TaskType::from_str(&task_type).map_err(HearthError::StoreError)?,
        priority: Priority::from_i32(row.get::<i32, _>("priority")),
        status: TaskStatus::from_str(&status).map_err(HearthError::StoreError)?,
        created_at: parse_ts(row.get("created_at"))?,
        scheduled_at: parse_ts(row.get("scheduled_at"))?,
        started_at: parse_opt_ts(row.get("started_at"))?,
        completed_at: parse_opt_ts(row.get("completed_at"))?,
        result_summary: row.get("result_summary"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        parent_id: row.get("parent_id"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        context: serde_json::from_str(&context_json).unwrap_or_default(),
        updated_at: parse_ts(row.get("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> TaskStore {
        TaskStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn seeds_bootstrap_tasks_on_first_open() {
        let store = store().await;
        assert!(store.pending_count().await.unwrap() >= 3);
    }

    #[tokio::test]
    async fn add_then_cancel_round_trip() {
        let store = store().await;
        let id = store
            .add(
                "test task",
                "desc",
                TaskType::Custom,
                Priority::Normal,
                None,
                vec![],
                HashMap::new(),
                None,
                2,
            )
            .await
            .unwrap();

        store.cancel(id, "no longer needed").await.unwrap();
        let cancelled = store.get_all(Some(TaskStatus::Cancelled), 100).await.unwrap();
        assert_eq!(cancelled.iter().filter(|t| t.id == id).count(), 1);
    }

    #[tokio::test]
    async fn next_pending_orders_by_priority_then_created_at() {
        let store = store().await;
        // Drain the bootstrap seed so only our rows are eligible.
        while let Some(t) = store.next_pending().await.unwrap() {
            store.cancel(t.id, "clearing for test").await.unwrap();
        }

        let low_id = store
            .add("low", "d", TaskType::Custom, Priority::Low, None, vec![], HashMap::new(), None, 2)
            .await
            .unwrap();
        let critical_id = store
            .add(
                "critical",
                "d",
                TaskType::Custom,
                Priority::Critical,
                None,
                vec![],
                HashMap::new(),
                None,
                2,
            )
            .await
            .unwrap();

        let next = store.next_pending().await.unwrap().unwrap();
        assert_eq!(next.id, critical_id);
        assert_ne!(next.id, low_id);
    }

    #[tokio::test]
    async fn fail_applies_exponential_backoff_then_terminal_failure() {
        let store = store().await;
        let id = store
            .add("x", "d", TaskType::Custom, Priority::Normal, None, vec![], HashMap::new(), None, 2)
            .await
            .unwrap();

        store.start(id).await.unwrap();
        let before = Utc::now();
        store.fail(id, "boom").await.unwrap();
        let after_first = store.get(id).await.unwrap().unwrap();
        assert_eq!(after_first.status, TaskStatus::Pending);
        assert!(after_first.scheduled_at > before + ChronoDuration::minutes(4));
        assert!(after_first.scheduled_at < before + ChronoDuration::minutes(9));

        store.start(id).await.unwrap();
        store.fail(id, "boom again").await.unwrap();
        let after_second = store.get(id).await.unwrap().unwrap();
        assert_eq!(after_second.status, TaskStatus::Pending);
        assert!(after_second.scheduled_at > before + ChronoDuration::minutes(9));
        assert!(after_second.scheduled_at < before + ChronoDuration::minutes(19));

        store.start(id).await.unwrap();
        store.fail(id, "boom a third time").await.unwrap();
        let after_third = store.get(id).await.unwrap().unwrap();
        assert_eq!(after_third.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn double_start_is_prevented_by_the_claim_predicate() {
        let store = store().await;
        let id = store
            .add("x", "d", TaskType::Custom, Priority::Normal, None, vec![], HashMap::new(), None, 2)
            .await
            .unwrap();

        store.start(id).await.unwrap();
        assert!(store.start(id).await.is_err());
    }

    #[tokio::test]
    async fn pause_running_returns_rows_to_pending() {
        let store = store().await;
        let id = store
            .add("x", "d", TaskType::Custom, Priority::Normal, None, vec![], HashMap::new(), None, 2)
            .await
            .unwrap();
        store.start(id).await.unwrap();

        let reclaimed = store.pause_running().await.unwrap();
        assert!(reclaimed >= 1);

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
    }

    #[tokio::test]
    async fn complete_after_pause_is_a_no_op() {
        let store = store().await;
        let id = store
            .add("x", "d", TaskType::Custom, Priority::Normal, None, vec![], HashMap::new(), None, 2)
            .await
            .unwrap();
        store.start(id).await.unwrap();
        store.pause_running().await.unwrap();

        // The row is pending again; a stale in-flight `complete` must be a
        // no-op, not an error or a state corruption.
        store.complete(id, "late result").await.unwrap();
        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn log_for_records_one_entry_per_transition() {
        let store = store().await;
        let id = store
            .add("x", "d", TaskType::Custom, Priority::Normal, None, vec![], HashMap::new(), None, 2)
            .await
            .unwrap();
        store.start(id).await.unwrap();
        store.complete(id, "done").await.unwrap();

        let log = store.log_for(id).await.unwrap();
        let events: Vec<_> = log.iter().map(|e| e.event).collect();
        assert_eq!(events, vec![TaskLogEvent::Created, TaskLogEvent::Started, TaskLogEvent::Completed]);
    }

    #[tokio::test]
    async fn record_interaction_round_trips() {
        let store = store().await;
        let interaction = Interaction {
            id: 0,
            timestamp: Utc::now(),
            user_input: "hello".to_string(),
            intent_json: serde_json::json!({"category": "general_chat"}),
            model_used: "small".to_string(),
            output: "hi!".to_string(),
            success: true,
            tool_calls: 0,
            duration_ms: 42,
        };
        let id = store.record_interaction(&interaction).await.unwrap();
        assert!(id > 0);
    }

    #[tokio::test]
    async fn user_facts_are_listed_most_recent_first() {
        let store = store().await;
        store.log_user_fact("likes tea", 0.8, "chat").await.unwrap();
        store.log_user_fact("works nights", 0.6, "chat").await.unwrap();

        let facts = store.list_user_facts(10).await.unwrap();
        assert_eq!(facts[0].fact, "works nights");
        assert_eq!(facts[1].fact, "likes tea");
    }

    #[tokio::test]
    async fn set_preference_upserts() {
        let store = store().await;
        store.set_preference("timezone", "UTC").await.unwrap();
        store.set_preference("timezone", "America/New_York").await.unwrap();

        let prefs = store.list_preferences().await.unwrap();
        assert_eq!(prefs.get("timezone").map(String::as_str), Some("America/New_York"));
    }
}
