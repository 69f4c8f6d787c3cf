use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use tm_core::{
    ProjectMutator, ProjectSyncState, StateStore, SyncSource, SyncStatus, TaskMutator,
    TaskStateFilter, TaskSyncState, TmError, TmResult,
};

/// SQLite-backed state store with per-key transactional upserts.
///
/// Rows are namespaced by a configurable prefix so multiple environments can
/// share one database file. Task rows are never physically deleted; archived
/// mirrors keep their row for audit.
pub struct SqliteStateStore {
    db: Arc<Mutex<Connection>>,
    namespace: String,
}

impl SqliteStateStore {
    pub fn open(db_path: &str, namespace: &str) -> TmResult<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| TmError::Storage(format!("state store open: {e}")))?;
        Self::create_tables(&conn)?;
        tracing::debug!(path = %db_path, namespace = %namespace, "state store opened");
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            namespace: namespace.to_string(),
        })
    }

    /// In-memory store (for tests).
    pub fn in_memory(namespace: &str) -> TmResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TmError::Storage(format!("state store in-memory: {e}")))?;
        Self::create_tables(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            namespace: namespace.to_string(),
        })
    }

    fn create_tables(conn: &Connection) -> TmResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS task_state (
                namespace TEXT NOT NULL,
                source_item_id TEXT NOT NULL,
                dest_page_id TEXT,
                payload_hash TEXT NOT NULL DEFAULT '',
                echo_hash TEXT,
                sync_status TEXT NOT NULL,
                sync_source TEXT NOT NULL,
                was_eligible INTEGER NOT NULL DEFAULT 0,
                last_synced_at TEXT NOT NULL,
                error_note TEXT,
                PRIMARY KEY (namespace, source_item_id)
            );
            CREATE INDEX IF NOT EXISTS idx_task_state_status
                ON task_state(namespace, sync_status);
            CREATE TABLE IF NOT EXISTS project_state (
                namespace TEXT NOT NULL,
                source_project_id TEXT NOT NULL,
                dest_page_id TEXT NOT NULL,
                name_last_written TEXT NOT NULL,
                echo_hash TEXT,
                created_at TEXT NOT NULL,
                areas_frozen_at TEXT,
                last_synced_at TEXT NOT NULL,
                PRIMARY KEY (namespace, source_project_id)
            );",
        )
        .map_err(|e| TmError::Storage(format!("state store schema: {e}")))?;
        Ok(())
    }

    fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskSyncState> {
        let status_str: String = row.get(4)?;
        let source_str: String = row.get(5)?;
        let last_synced_str: String = row.get(7)?;
        Ok(TaskSyncState {
            source_item_id: row.get(0)?,
            dest_page_id: row.get(1)?,
            payload_hash: row.get(2)?,
            echo_hash: row.get(3)?,
            sync_status: SyncStatus::from_str(&status_str).unwrap_or(SyncStatus::Error),
            sync_source: SyncSource::from_str(&source_str).unwrap_or(SyncSource::Manual),
            was_eligible: row.get::<_, i64>(6)? != 0,
            last_synced_at: parse_ts(&last_synced_str),
            error_note: row.get(8)?,
        })
    }

    fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectSyncState> {
        let created_str: String = row.get(4)?;
        let frozen_str: Option<String> = row.get(5)?;
        let last_synced_str: String = row.get(6)?;
        Ok(ProjectSyncState {
            source_project_id: row.get(0)?,
            dest_page_id: row.get(1)?,
            name_last_written: row.get(2)?,
            echo_hash: row.get(3)?,
            created_at: parse_ts(&created_str),
            areas_frozen_at: frozen_str.as_deref().map(parse_ts),
            last_synced_at: parse_ts(&last_synced_str),
        })
    }

    fn select_task(
        conn: &Connection,
        namespace: &str,
        id: &str,
    ) -> TmResult<Option<TaskSyncState>> {
        conn.query_row(
            "SELECT source_item_id, dest_page_id, payload_hash, echo_hash, sync_status,
                    sync_source, was_eligible, last_synced_at, error_note
             FROM task_state WHERE namespace = ?1 AND source_item_id = ?2",
            params![namespace, id],
            Self::row_to_task,
        )
        .optional()
        .map_err(|e| TmError::Storage(format!("get task state: {e}")))
    }

    fn select_project(
        conn: &Connection,
        namespace: &str,
        id: &str,
    ) -> TmResult<Option<ProjectSyncState>> {
        conn.query_row(
            "SELECT source_project_id, dest_page_id, name_last_written, echo_hash,
                    created_at, areas_frozen_at, last_synced_at
             FROM project_state WHERE namespace = ?1 AND source_project_id = ?2",
            params![namespace, id],
            Self::row_to_project,
        )
        .optional()
        .map_err(|e| TmError::Storage(format!("get project state: {e}")))
    }

    fn write_task(conn: &Connection, namespace: &str, state: &TaskSyncState) -> TmResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO task_state
                (namespace, source_item_id, dest_page_id, payload_hash, echo_hash,
                 sync_status, sync_source, was_eligible, last_synced_at, error_note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                namespace,
                state.source_item_id,
                state.dest_page_id,
                state.payload_hash,
                state.echo_hash,
                state.sync_status.as_str(),
                state.sync_source.as_str(),
                state.was_eligible as i64,
                state.last_synced_at.to_rfc3339(),
                state.error_note,
            ],
        )
        .map_err(|e| TmError::Storage(format!("write task state: {e}")))?;
        Ok(())
    }

    fn write_project(
        conn: &Connection,
        namespace: &str,
        state: &ProjectSyncState,
    ) -> TmResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO project_state
                (namespace, source_project_id, dest_page_id, name_last_written, echo_hash,
                 created_at, areas_frozen_at, last_synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                namespace,
                state.source_project_id,
                state.dest_page_id,
                state.name_last_written,
                state.echo_hash,
                state.created_at.to_rfc3339(),
                state.areas_frozen_at.map(|t| t.to_rfc3339()),
                state.last_synced_at.to_rfc3339(),
            ],
        )
        .map_err(|e| TmError::Storage(format!("write project state: {e}")))?;
        Ok(())
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_task(&self, source_item_id: &str) -> TmResult<Option<TaskSyncState>> {
        let db = self.db.lock().await;
        Self::select_task(&db, &self.namespace, source_item_id)
    }

    async fn upsert_task(
        &self,
        source_item_id: &str,
        mutate: TaskMutator<'_>,
    ) -> TmResult<TaskSyncState> {
        let mut db = self.db.lock().await;
        let tx = db
            .transaction()
            .map_err(|e| TmError::Storage(format!("task upsert tx: {e}")))?;
        let current = Self::select_task(&tx, &self.namespace, source_item_id)?;
        let next = mutate(current)?;
        Self::write_task(&tx, &self.namespace, &next)?;
        tx.commit()
            .map_err(|e| TmError::Storage(format!("task upsert commit: {e}")))?;
        Ok(next)
    }

    async fn list_tasks(&self, filter: TaskStateFilter) -> TmResult<Vec<TaskSyncState>> {
        let db = self.db.lock().await;
        let mut out = Vec::new();
        match filter.status {
            Some(status) => {
                let mut stmt = db
                    .prepare(
                        "SELECT source_item_id, dest_page_id, payload_hash, echo_hash,
                                sync_status, sync_source, was_eligible, last_synced_at, error_note
                         FROM task_state WHERE namespace = ?1 AND sync_status = ?2
                         ORDER BY source_item_id",
                    )
                    .map_err(|e| TmError::Storage(format!("list tasks prepare: {e}")))?;
                let rows = stmt
                    .query_map(params![self.namespace, status.as_str()], Self::row_to_task)
                    .map_err(|e| TmError::Storage(format!("list tasks query: {e}")))?;
                for row in rows {
                    out.push(row.map_err(|e| TmError::Storage(format!("list tasks row: {e}")))?);
                }
            }
            None => {
                let mut stmt = db
                    .prepare(
                        "SELECT source_item_id, dest_page_id, payload_hash, echo_hash,
                                sync_status, sync_source, was_eligible, last_synced_at, error_note
                         FROM task_state WHERE namespace = ?1 ORDER BY source_item_id",
                    )
                    .map_err(|e| TmError::Storage(format!("list tasks prepare: {e}")))?;
                let rows = stmt
                    .query_map(params![self.namespace], Self::row_to_task)
                    .map_err(|e| TmError::Storage(format!("list tasks query: {e}")))?;
                for row in rows {
                    out.push(row.map_err(|e| TmError::Storage(format!("list tasks row: {e}")))?);
                }
            }
        }
        Ok(out)
    }

    async fn get_project(&self, source_project_id: &str) -> TmResult<Option<ProjectSyncState>> {
        let db = self.db.lock().await;
        Self::select_project(&db, &self.namespace, source_project_id)
    }

    async fn upsert_project(
        &self,
        source_project_id: &str,
        mutate: ProjectMutator<'_>,
    ) -> TmResult<ProjectSyncState> {
        let mut db = self.db.lock().await;
        let tx = db
            .transaction()
            .map_err(|e| TmError::Storage(format!("project upsert tx: {e}")))?;
        let current = Self::select_project(&tx, &self.namespace, source_project_id)?;
        let next = mutate(current)?;
        Self::write_project(&tx, &self.namespace, &next)?;
        tx.commit()
            .map_err(|e| TmError::Storage(format!("project upsert commit: {e}")))?;
        Ok(next)
    }

    async fn list_projects(&self) -> TmResult<Vec<ProjectSyncState>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(
                "SELECT source_project_id, dest_page_id, name_last_written, echo_hash,
                        created_at, areas_frozen_at, last_synced_at
                 FROM project_state WHERE namespace = ?1 ORDER BY source_project_id",
            )
            .map_err(|e| TmError::Storage(format!("list projects prepare: {e}")))?;
        let rows = stmt
            .query_map(params![self.namespace], Self::row_to_project)
            .map_err(|e| TmError::Storage(format!("list projects query: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| TmError::Storage(format!("list projects row: {e}")))?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> SqliteStateStore {
        SqliteStateStore::in_memory("test-v1").expect("in-memory store")
    }

    #[tokio::test]
    async fn get_missing_task_returns_none() {
        let store = make_store();
        assert!(store.get_task("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_creates_and_updates() {
        let store = make_store();
        let created = store
            .upsert_task("t1", &|current| {
                assert!(current.is_none());
                let mut state = TaskSyncState::new("t1", SyncSource::Webhook);
                state.payload_hash = "h1".into();
                Ok(state)
            })
            .await
            .unwrap();
        assert_eq!(created.payload_hash, "h1");

        let updated = store
            .upsert_task("t1", &|current| {
                let mut state = current.expect("existing row");
                assert_eq!(state.payload_hash, "h1");
                state.payload_hash = "h2".into();
                state.dest_page_id = Some("page-1".into());
                Ok(state)
            })
            .await
            .unwrap();
        assert_eq!(updated.payload_hash, "h2");

        let fetched = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.dest_page_id.as_deref(), Some("page-1"));
        assert_eq!(fetched.sync_source, SyncSource::Webhook);
    }

    #[tokio::test]
    async fn failed_mutator_leaves_row_unchanged() {
        let store = make_store();
        store
            .upsert_task("t1", &|_| {
                let mut state = TaskSyncState::new("t1", SyncSource::Manual);
                state.payload_hash = "h1".into();
                Ok(state)
            })
            .await
            .unwrap();

        let result = store
            .upsert_task("t1", &|_| Err(TmError::Internal("boom".into())))
            .await;
        assert!(result.is_err());

        let fetched = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.payload_hash, "h1");
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status() {
        let store = make_store();
        for (id, status) in [("a", SyncStatus::Ok), ("b", SyncStatus::Archived)] {
            store
                .upsert_task(id, &move |_| {
                    let mut state = TaskSyncState::new(id, SyncSource::Reconciler);
                    state.sync_status = status;
                    Ok(state)
                })
                .await
                .unwrap();
        }

        let ok_rows = store
            .list_tasks(TaskStateFilter {
                status: Some(SyncStatus::Ok),
            })
            .await
            .unwrap();
        assert_eq!(ok_rows.len(), 1);
        assert_eq!(ok_rows[0].source_item_id, "a");

        let all = store.list_tasks(TaskStateFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn project_state_round_trips() {
        let store = make_store();
        let now = Utc::now();
        store
            .upsert_project("p1", &move |current| {
                assert!(current.is_none());
                Ok(ProjectSyncState {
                    source_project_id: "p1".into(),
                    dest_page_id: "page-p1".into(),
                    name_last_written: "Ops".into(),
                    echo_hash: Some("e1".into()),
                    created_at: now,
                    areas_frozen_at: Some(now),
                    last_synced_at: now,
                })
            })
            .await
            .unwrap();

        let fetched = store.get_project("p1").await.unwrap().unwrap();
        assert_eq!(fetched.dest_page_id, "page-p1");
        assert_eq!(fetched.name_last_written, "Ops");
        assert!(fetched.areas_frozen_at.is_some());

        let all = store.list_projects().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_string_lossy().to_string();
        let store_a = SqliteStateStore::open(&path, "env-a").unwrap();
        let store_b = SqliteStateStore::open(&path, "env-b").unwrap();

        store_a
            .upsert_task("t1", &|_| Ok(TaskSyncState::new("t1", SyncSource::Webhook)))
            .await
            .unwrap();

        assert!(store_a.get_task("t1").await.unwrap().is_some());
        assert!(store_b.get_task("t1").await.unwrap().is_none());
    }
}
