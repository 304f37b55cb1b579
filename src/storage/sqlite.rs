//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Several engine
//! instances may share one database file: every status change is a
//! single guarded `UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{StorageError, TaskQuery, TaskStore, check_edge};
use crate::core::task::{NewTask, Task, Transition};
use crate::core::types::{TaskId, TaskStatus};

const TASK_COLUMNS: &str = "id, adapter_name, method_name, params, status, result, error_message, \
     created_at, updated_at, started_at, finished_at, next_retry_at, retry_count, deleted_at";

// Every status change is guarded on the expected current status and on the
// task not being deleted; the last two binds are always `id` and `from`.
const CLAIM_SQL: &str = "UPDATE tasks SET status = 'RUNNING', started_at = ?, finished_at = NULL, \
     next_retry_at = NULL, updated_at = ? \
     WHERE id = ? AND status = ? AND deleted_at IS NULL";

const SUCCEED_SQL: &str = "UPDATE tasks SET status = 'SUCCESS', result = ?, error_message = NULL, \
     finished_at = ?, next_retry_at = NULL, updated_at = ? \
     WHERE id = ? AND status = ? AND deleted_at IS NULL";

const FAIL_SQL: &str = "UPDATE tasks SET status = 'FAILED', result = NULL, error_message = ?, \
     retry_count = ?, finished_at = ?, next_retry_at = NULL, updated_at = ? \
     WHERE id = ? AND status = ? AND deleted_at IS NULL";

const RETRY_SQL: &str = "UPDATE tasks SET status = 'RETRY', result = NULL, error_message = ?, \
     retry_count = ?, finished_at = NULL, next_retry_at = ?, updated_at = ? \
     WHERE id = ? AND status = ? AND deleted_at IS NULL";

type TaskRow = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    i64,
    Option<i64>,
);

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::with_pool_size(path, 5).await
    }

    /// Like [`SqliteStore::new`], with an explicit connection pool size.
    pub async fn with_pool_size(
        path: impl AsRef<Path>,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn exists(&self, id: TaskId) -> Result<bool, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM tasks WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.is_some())
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let unavailable = match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(e) => e.message().contains("database is locked"),
        _ => false,
    };
    if unavailable {
        StorageError::Unavailable(err.to_string())
    } else {
        StorageError::Other(err.to_string())
    }
}

// Timestamps are stored as milliseconds since the Unix epoch.
fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::SerializationError(format!("invalid timestamp: {}", millis)))
}

fn opt_from_millis(millis: Option<i64>) -> Result<Option<DateTime<Utc>>, StorageError> {
    millis.map(from_millis).transpose()
}

fn now_millis() -> i64 {
    to_millis(Utc::now())
}

fn row_to_task(row: TaskRow) -> Result<Task, StorageError> {
    let status = TaskStatus::from_str(&row.4)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
    let result: Option<serde_json::Value> = row
        .5
        .as_deref()
        .map(|raw| serde_json::from_str(raw))
        .transpose()?;

    Ok(Task {
        id: TaskId::new(row.0),
        adapter_name: row.1,
        method_name: row.2,
        params: serde_json::from_str(&row.3)?,
        status,
        result,
        error_message: row.6,
        created_at: from_millis(row.7)?,
        updated_at: from_millis(row.8)?,
        started_at: opt_from_millis(row.9)?,
        finished_at: opt_from_millis(row.10)?,
        next_retry_at: opt_from_millis(row.11)?,
        retry_count: u32::try_from(row.12)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?,
        deleted_at: opt_from_millis(row.13)?,
    })
}

fn rows_to_tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>, StorageError> {
    rows.into_iter().map(row_to_task).collect()
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create(&self, task: NewTask) -> Result<Task, StorageError> {
        let now = now_millis();
        let params = serde_json::to_string(&task.params)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks
                (adapter_name, method_name, params, status, retry_count, created_at, updated_at)
            VALUES (?, ?, ?, 'PENDING', 0, ?, ?)
            "#,
        )
        .bind(&task.adapter_name)
        .bind(&task.method_name)
        .bind(params)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let id = TaskId::new(result.last_insert_rowid());
        Ok(Task::pending(id, task, from_millis(now)?))
    }

    async fn get(&self, id: TaskId) -> Result<Task, StorageError> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
        let row: TaskRow = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| StorageError::not_found(id))?;

        row_to_task(row)
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, StorageError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM tasks
            WHERE deleted_at IS NULL
              AND (status = 'PENDING' OR (status = 'RETRY' AND next_retry_at <= ?))
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
            TASK_COLUMNS
        ))
        .bind(to_millis(now))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows_to_tasks(rows)
    }

    async fn transition(
        &self,
        id: TaskId,
        from: TaskStatus,
        transition: Transition,
    ) -> Result<bool, StorageError> {
        check_edge(id, from, &transition)?;

        let now = now_millis();

        let query = match transition {
            Transition::Claim { started_at } => sqlx::query(CLAIM_SQL)
                .bind(to_millis(started_at))
                .bind(now),
            Transition::Succeed {
                result,
                finished_at,
            } => sqlx::query(SUCCEED_SQL)
                .bind(serde_json::to_string(&result)?)
                .bind(to_millis(finished_at))
                .bind(now),
            Transition::Fail {
                error,
                retry_count,
                finished_at,
            } => sqlx::query(FAIL_SQL)
                .bind(error)
                .bind(i64::from(retry_count))
                .bind(to_millis(finished_at))
                .bind(now),
            Transition::Retry {
                error,
                retry_count,
                next_retry_at,
            } => sqlx::query(RETRY_SQL)
                .bind(error)
                .bind(i64::from(retry_count))
                .bind(to_millis(next_retry_at))
                .bind(now),
        };

        let result = query
            .bind(id.get())
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.exists(id).await? {
            Ok(false)
        } else {
            Err(StorageError::not_found(id))
        }
    }

    async fn soft_delete(&self, id: TaskId) -> Result<(), StorageError> {
        let now = now_millis();
        let result = sqlx::query(
            "UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(id));
        }
        Ok(())
    }

    async fn list(&self, query: TaskQuery) -> Result<Vec<Task>, StorageError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM tasks
            WHERE deleted_at IS NULL AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
            TASK_COLUMNS
        ))
        .bind(query.status.map(TaskStatus::as_str))
        .bind(query.status.map(TaskStatus::as_str))
        .bind(i64::try_from(query.effective_limit()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows_to_tasks(rows)
    }

    async fn list_running_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, StorageError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM tasks
            WHERE deleted_at IS NULL AND status = 'RUNNING' AND started_at < ?
            ORDER BY started_at ASC, id ASC
            LIMIT ?
            "#,
            TASK_COLUMNS
        ))
        .bind(to_millis(cutoff))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows_to_tasks(rows)
    }
}
