//! Durable SQLite-backed queue of [`SyncMessage`]s.
//!
//! Webhook intake and the reconciler enqueue; the worker pool dequeues.
//! Messages carry an idempotency key derived from the action, item id, and
//! snapshot so a webhook storm for one item collapses while it is still
//! pending. Failed messages retry with exponential backoff and dead-letter
//! after the attempt budget.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use tm_core::{SyncMessage, TmError, TmResult};

use crate::hash::sha256_hex;

const BACKOFF_BASE_SECS: i64 = 5;
const BACKOFF_MAX_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl QueueStats {
    /// Messages not yet finished: what backpressure checks look at.
    pub fn backlog(&self) -> u64 {
        self.pending + self.running + self.failed
    }
}

pub struct SyncQueue {
    db: Arc<Mutex<Connection>>,
    max_attempts: u32,
}

impl SyncQueue {
    pub fn open(db_path: &str, max_attempts: u32) -> TmResult<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| TmError::Storage(format!("sync queue open: {e}")))?;
        Self::create_table(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            max_attempts: max_attempts.max(1),
        })
    }

    /// In-memory queue (for tests).
    pub fn in_memory(max_attempts: u32) -> TmResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TmError::Storage(format!("sync queue in-memory: {e}")))?;
        Self::create_table(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            max_attempts: max_attempts.max(1),
        })
    }

    fn create_table(conn: &Connection) -> TmResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sync_queue (
                id TEXT PRIMARY KEY,
                source_item_id TEXT NOT NULL,
                message TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at TEXT NOT NULL,
                next_retry_at TEXT,
                idempotency_key TEXT UNIQUE
            );
            CREATE INDEX IF NOT EXISTS idx_sync_queue_status
                ON sync_queue(status, created_at ASC);",
        )
        .map_err(|e| TmError::Storage(format!("sync queue schema: {e}")))?;
        Ok(())
    }

    fn idempotency_key(message: &SyncMessage) -> String {
        let snapshot_digest = message
            .snapshot
            .as_ref()
            .and_then(|s| serde_json::to_string(s).ok())
            .map(|s| sha256_hex(s.as_bytes()))
            .unwrap_or_default();
        format!(
            "{}:{}:{snapshot_digest}",
            message.action.as_str(),
            message.source_item_id
        )
    }

    /// Enqueue a message. An identical message already pending or running
    /// is returned instead of inserting a duplicate.
    pub async fn enqueue(&self, message: &SyncMessage) -> TmResult<Uuid> {
        let db = self.db.lock().await;
        let key = Self::idempotency_key(message);

        let existing: Option<String> = db
            .query_row(
                "SELECT id FROM sync_queue
                 WHERE idempotency_key = ?1 AND status IN ('pending', 'running', 'failed')",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TmError::Storage(format!("idempotency check: {e}")))?;
        if let Some(id) = existing {
            tracing::debug!(item_id = %message.source_item_id, "identical message already queued");
            return Uuid::parse_str(&id)
                .map_err(|e| TmError::Storage(format!("parse queued id: {e}")));
        }

        let id = Uuid::now_v7();
        db.execute(
            "INSERT INTO sync_queue (id, source_item_id, message, status, attempts, created_at, idempotency_key)
             VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5)",
            params![
                id.to_string(),
                message.source_item_id,
                serde_json::to_string(message)?,
                Utc::now().to_rfc3339(),
                key,
            ],
        )
        .map_err(|e| TmError::Storage(format!("enqueue: {e}")))?;
        Ok(id)
    }

    /// Atomically claim the oldest runnable message (pending, or failed and
    /// past its retry time).
    pub async fn dequeue(&self) -> TmResult<Option<(Uuid, SyncMessage)>> {
        let db = self.db.lock().await;
        let now = Utc::now().to_rfc3339();

        let row: Option<(String, String)> = db
            .query_row(
                "SELECT id, message FROM sync_queue
                 WHERE status = 'pending'
                    OR (status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?1)
                 ORDER BY created_at ASC
                 LIMIT 1",
                params![now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| TmError::Storage(format!("dequeue select: {e}")))?;

        let Some((id_str, message_str)) = row else {
            return Ok(None);
        };

        db.execute(
            "UPDATE sync_queue SET status = 'running' WHERE id = ?1",
            params![id_str],
        )
        .map_err(|e| TmError::Storage(format!("dequeue claim: {e}")))?;

        let id = Uuid::parse_str(&id_str)
            .map_err(|e| TmError::Storage(format!("parse queued id: {e}")))?;
        let mut message: SyncMessage = serde_json::from_str(&message_str)?;

        let attempts: u32 = db
            .query_row(
                "SELECT attempts FROM sync_queue WHERE id = ?1",
                params![id_str],
                |row| row.get(0),
            )
            .map_err(|e| TmError::Storage(format!("dequeue attempts: {e}")))?;
        message.attempt = attempts;

        Ok(Some((id, message)))
    }

    /// Acknowledge a message as done.
    pub async fn complete(&self, id: Uuid) -> TmResult<()> {
        let db = self.db.lock().await;
        let affected = db
            .execute(
                "UPDATE sync_queue SET status = 'completed', error = NULL, idempotency_key = NULL
                 WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| TmError::Storage(format!("complete: {e}")))?;
        if affected == 0 {
            return Err(TmError::Storage(format!("message not found: {id}")));
        }
        Ok(())
    }

    /// Nack a message: schedule a retry with exponential backoff, or move it
    /// to the dead-letter state once the attempt budget is spent.
    pub async fn fail(&self, id: Uuid, error: &str) -> TmResult<()> {
        let db = self.db.lock().await;
        let attempts: u32 = db
            .query_row(
                "SELECT attempts FROM sync_queue WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| TmError::Storage(format!("fail lookup: {e}")))?;

        let new_attempts = attempts + 1;
        if new_attempts >= self.max_attempts {
            db.execute(
                "UPDATE sync_queue SET status = 'dead', attempts = ?1, error = ?2,
                        next_retry_at = NULL, idempotency_key = NULL
                 WHERE id = ?3",
                params![new_attempts, error, id.to_string()],
            )
            .map_err(|e| TmError::Storage(format!("fail dead: {e}")))?;
            tracing::warn!(message_id = %id, error = %error, "message dead-lettered");
        } else {
            let backoff_secs =
                (BACKOFF_BASE_SECS * 2_i64.pow(new_attempts)).min(BACKOFF_MAX_SECS);
            let next_retry = Utc::now() + Duration::seconds(backoff_secs);
            db.execute(
                "UPDATE sync_queue SET status = 'failed', attempts = ?1, error = ?2, next_retry_at = ?3
                 WHERE id = ?4",
                params![
                    new_attempts,
                    error,
                    next_retry.to_rfc3339(),
                    id.to_string()
                ],
            )
            .map_err(|e| TmError::Storage(format!("fail retry: {e}")))?;
        }
        Ok(())
    }

    pub async fn stats(&self) -> TmResult<QueueStats> {
        let db = self.db.lock().await;
        let mut stats = QueueStats::default();
        let mut stmt = db
            .prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")
            .map_err(|e| TmError::Storage(format!("stats prepare: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })
            .map_err(|e| TmError::Storage(format!("stats query: {e}")))?;
        for row in rows {
            let (status, count) =
                row.map_err(|e| TmError::Storage(format!("stats row: {e}")))?;
            match status.as_str() {
                "pending" => stats.pending = count,
                "running" => stats.running = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                "dead" => stats.dead = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Delete completed rows older than `older_than_days`.
    pub async fn purge_completed(&self, older_than_days: u32) -> TmResult<u64> {
        let db = self.db.lock().await;
        let cutoff = Utc::now() - Duration::days(older_than_days as i64);
        let deleted = db
            .execute(
                "DELETE FROM sync_queue WHERE status = 'completed' AND created_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| TmError::Storage(format!("purge: {e}")))?;
        Ok(deleted as u64)
    }
}
