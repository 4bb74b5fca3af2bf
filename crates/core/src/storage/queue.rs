use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::{ts_from_sql, ts_to_sql, LocalStore};
use crate::errors::CoreError;
use crate::models::sync::{EntityType, PendingSyncOperation, SyncPayload};

const QUEUE_COLUMNS: &str = "id, payload, created_at, attempt_count, last_attempt_at";

/// FIFO by creation time; insertion order breaks ties.
const QUEUE_ORDER: &str = "ORDER BY created_at ASC, rowid ASC";

impl LocalStore {
    /// Persist a pending operation. The payload is validated before it is written.
    pub fn enqueue(&self, op: &PendingSyncOperation) -> Result<(), CoreError> {
        op.payload.validate()?;
        let payload = serde_json::to_string(&op.payload)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_queue(id, entity_type, entity_id, operation, payload,
             created_at, attempt_count, last_attempt_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                op.id,
                op.entity_type().as_key(),
                op.entity_id(),
                op.operation().as_key(),
                payload,
                ts_to_sql(&op.created_at),
                op.attempt_count,
                op.last_attempt_at.as_ref().map(ts_to_sql),
            ],
        )?;
        debug!(
            op_id = %op.id,
            entity = %op.entity_type(),
            entity_id = op.entity_id(),
            operation = %op.operation(),
            "Enqueued sync operation"
        );
        Ok(())
    }

    /// Operations still eligible for automatic replay (`attempt_count < max_attempts`), FIFO.
    pub fn list_retryable(&self, max_attempts: u32) -> Result<Vec<PendingSyncOperation>, CoreError> {
        self.select_queue(
            &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE attempt_count < ?1 {QUEUE_ORDER}"),
            params![max_attempts],
        )
    }

    /// Operations that exhausted their retry budget.
    pub fn list_parked(&self, max_attempts: u32) -> Result<Vec<PendingSyncOperation>, CoreError> {
        self.select_queue(
            &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE attempt_count >= ?1 {QUEUE_ORDER}"),
            params![max_attempts],
        )
    }

    /// Full queue listing, parked operations included.
    pub fn list_pending(&self) -> Result<Vec<PendingSyncOperation>, CoreError> {
        self.select_queue(
            &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue {QUEUE_ORDER}"),
            [],
        )
    }

    pub fn pending_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<PendingSyncOperation>, CoreError> {
        self.select_queue(
            &format!(
                "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE entity_type=?1 AND entity_id=?2 {QUEUE_ORDER}"
            ),
            params![entity_type.as_key(), entity_id],
        )
    }

    pub fn pending_count(&self) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Success removes the operation; failure bumps `attempt_count` and stamps `last_attempt_at`.
    /// Returns the attempt count after the update (0 when removed or missing).
    pub fn record_outcome(
        &self,
        op_id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<u32, CoreError> {
        let conn = self.lock()?;
        if success {
            conn.execute("DELETE FROM sync_queue WHERE id=?1", params![op_id])?;
            return Ok(0);
        }
        conn.execute(
            "UPDATE sync_queue SET attempt_count = attempt_count + 1, last_attempt_at=?2 WHERE id=?1",
            params![op_id, ts_to_sql(&at)],
        )?;
        let attempts: Option<u32> = conn
            .query_row(
                "SELECT attempt_count FROM sync_queue WHERE id=?1",
                params![op_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(attempts.unwrap_or(0))
    }

    /// Drop one operation without counting it as a success (terminal rejection, cancellation).
    pub fn remove_pending(&self, op_id: &str) -> Result<bool, CoreError> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM sync_queue WHERE id=?1", params![op_id])? > 0)
    }

    /// Drop every queued operation for one entity. Returns how many were removed.
    pub fn remove_pending_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM sync_queue WHERE entity_type=?1 AND entity_id=?2",
            params![entity_type.as_key(), entity_id],
        )?;
        Ok(removed)
    }

    /// Give a parked operation a fresh retry budget.
    pub fn reenable(&self, op_id: &str) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE sync_queue SET attempt_count=0 WHERE id=?1",
            params![op_id],
        )?;
        if changed == 0 {
            return Err(CoreError::not_found("PendingSyncOperation", op_id));
        }
        Ok(())
    }

    fn select_queue(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<PendingSyncOperation>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, QueueRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(QueueRow::into_model).collect()
    }
}

struct QueueRow {
    id: String,
    payload: String,
    created_at: String,
    attempt_count: u32,
    last_attempt_at: Option<String>,
}

impl QueueRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            payload: r.get(1)?,
            created_at: r.get(2)?,
            attempt_count: r.get(3)?,
            last_attempt_at: r.get(4)?,
        })
    }

    fn into_model(self) -> Result<PendingSyncOperation, CoreError> {
        let payload: SyncPayload = serde_json::from_str(&self.payload)
            .map_err(|e| CoreError::Deserialization(format!("sync payload {}: {e}", self.id)))?;
        Ok(PendingSyncOperation {
            id: self.id,
            payload,
            created_at: ts_from_sql(&self.created_at)?,
            attempt_count: self.attempt_count,
            last_attempt_at: self.last_attempt_at.as_deref().map(ts_from_sql).transpose()?,
        })
    }
}
