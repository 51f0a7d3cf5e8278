use std::path::Path;

use async_trait::async_trait;
use remora_task::{Task, TaskStatus};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::types::Json;

use crate::types::TaskRow;
use crate::{Store, StoreError};

const SELECT_TASK: &str = r#"
  SELECT id, name, task_type, command, args, workdir, env, timeout,
         priority, retry_count, retry_delay, max_retries,
         status, exit_code, stdout, stderr, error,
         created_at, assigned_at, started_at, ended_at,
         machine_id, group_id, parent_id, depends_on,
         assigned_agent_id, lease_expires_at, attempt_id, synced
  FROM local_tasks
"#;

/// SQLite-based store implementation.
#[derive(Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open or create the database file at `path` and bring its schema up to
  /// date. Missing parent directories are created.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(|e| {
          sqlx::Error::Configuration(format!("failed to create db directory: {e}").into())
        })?;
      }
    }

    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn save(&self, task: &Task) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO local_tasks (
        id, name, task_type, command, args, workdir, env, timeout,
        priority, retry_count, retry_delay, max_retries,
        status, exit_code, stdout, stderr, error,
        created_at, assigned_at, started_at, ended_at,
        machine_id, group_id, parent_id, depends_on,
        assigned_agent_id, lease_expires_at, attempt_id, synced
      ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        task_type = excluded.task_type,
        command = excluded.command,
        args = excluded.args,
        workdir = excluded.workdir,
        env = excluded.env,
        timeout = excluded.timeout,
        priority = excluded.priority,
        retry_count = excluded.retry_count,
        retry_delay = excluded.retry_delay,
        max_retries = excluded.max_retries,
        status = excluded.status,
        exit_code = excluded.exit_code,
        stdout = excluded.stdout,
        stderr = excluded.stderr,
        error = excluded.error,
        created_at = excluded.created_at,
        assigned_at = excluded.assigned_at,
        started_at = excluded.started_at,
        ended_at = excluded.ended_at,
        machine_id = excluded.machine_id,
        group_id = excluded.group_id,
        parent_id = excluded.parent_id,
        depends_on = excluded.depends_on,
        assigned_agent_id = excluded.assigned_agent_id,
        lease_expires_at = excluded.lease_expires_at,
        attempt_id = excluded.attempt_id,
        synced = excluded.synced
      "#,
    )
    .bind(&task.id)
    .bind(&task.name)
    .bind(task.task_type.as_str())
    .bind(&task.command)
    .bind(Json(&task.args))
    .bind(&task.workdir)
    .bind(Json(&task.env))
    .bind(task.timeout)
    .bind(task.priority)
    .bind(task.retry_count)
    .bind(task.retry_delay)
    .bind(task.max_retries)
    .bind(task.status.as_str())
    .bind(task.exit_code)
    .bind(&task.stdout)
    .bind(&task.stderr)
    .bind(&task.error)
    .bind(task.created_at)
    .bind(task.assigned_at)
    .bind(task.started_at)
    .bind(task.ended_at)
    .bind(&task.machine_id)
    .bind(&task.group_id)
    .bind(&task.parent_id)
    .bind(Json(&task.depends_on))
    .bind(&task.assigned_agent_id)
    .bind(task.lease_expires_at)
    .bind(&task.attempt_id)
    .bind(task.synced)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get(&self, task_id: &str) -> Result<Task, StoreError> {
    let sql = format!("{SELECT_TASK} WHERE id = ?");
    let row: Option<TaskRow> = sqlx::query_as(&sql)
      .bind(task_id)
      .fetch_optional(&self.pool)
      .await?;

    match row {
      Some(row) => Task::try_from(row),
      None => Err(StoreError::NotFound(task_id.to_string())),
    }
  }

  async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
    let sql = format!("{SELECT_TASK} WHERE status = ? ORDER BY priority ASC, created_at ASC");
    let rows: Vec<TaskRow> = sqlx::query_as(&sql)
      .bind(status.as_str())
      .fetch_all(&self.pool)
      .await?;
    rows.into_iter().map(Task::try_from).collect()
  }

  async fn list_unsynced(&self) -> Result<Vec<Task>, StoreError> {
    let sql = format!(
      "{SELECT_TASK} WHERE synced = 0 AND status IN ('completed', 'failed', 'cancelled') ORDER BY ended_at ASC"
    );
    let rows: Vec<TaskRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
    rows.into_iter().map(Task::try_from).collect()
  }

  async fn mark_synced(&self, task_id: &str) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE local_tasks SET synced = 1 WHERE id = ?")
      .bind(task_id)
      .execute(&self.pool)
      .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(task_id.to_string()));
    }
    Ok(())
  }

  async fn delete(&self, task_id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM local_tasks WHERE id = ?")
      .bind(task_id)
      .execute(&self.pool)
      .await?;

    Ok(())
  }
}
