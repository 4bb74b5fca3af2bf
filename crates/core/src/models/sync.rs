use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::calorie::CalorieEntry;
use super::transaction::Transaction;
use crate::errors::CoreError;

/// Kind of entity a queued operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Transaction,
    CalorieEntry,
}

impl EntityType {
    pub fn as_key(&self) -> &'static str {
        match self {
            EntityType::Transaction => "transaction",
            EntityType::CalorieEntry => "calorie_entry",
        }
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transaction" => Ok(EntityType::Transaction),
            "calorie_entry" => Ok(EntityType::CalorieEntry),
            other => Err(CoreError::Deserialization(format!(
                "unknown entity type '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_key(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(CoreError::Deserialization(format!(
                "unknown operation kind '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_key())
    }
}

/// Everything needed to replay a mutation, one variant per entity + operation.
///
/// Creates and updates carry the full row; deletes carry the id, plus the
/// server id for calorie entries the service has already numbered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SyncPayload {
    CreateTransaction(Transaction),
    UpdateTransaction(Transaction),
    DeleteTransaction { id: String },
    CreateCalorieEntry(CalorieEntry),
    UpdateCalorieEntry(CalorieEntry),
    DeleteCalorieEntry {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_id: Option<String>,
    },
}

impl SyncPayload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            SyncPayload::CreateTransaction(_)
            | SyncPayload::UpdateTransaction(_)
            | SyncPayload::DeleteTransaction { .. } => EntityType::Transaction,
            SyncPayload::CreateCalorieEntry(_)
            | SyncPayload::UpdateCalorieEntry(_)
            | SyncPayload::DeleteCalorieEntry { .. } => EntityType::CalorieEntry,
        }
    }

    pub fn operation(&self) -> OperationKind {
        match self {
            SyncPayload::CreateTransaction(_) | SyncPayload::CreateCalorieEntry(_) => {
                OperationKind::Create
            }
            SyncPayload::UpdateTransaction(_) | SyncPayload::UpdateCalorieEntry(_) => {
                OperationKind::Update
            }
            SyncPayload::DeleteTransaction { .. } | SyncPayload::DeleteCalorieEntry { .. } => {
                OperationKind::Delete
            }
        }
    }

    /// Id of the entity the operation touches.
    pub fn entity_id(&self) -> &str {
        match self {
            SyncPayload::CreateTransaction(t) | SyncPayload::UpdateTransaction(t) => &t.id,
            SyncPayload::CreateCalorieEntry(c) | SyncPayload::UpdateCalorieEntry(c) => &c.id,
            SyncPayload::DeleteTransaction { id } | SyncPayload::DeleteCalorieEntry { id, .. } => id,
        }
    }

    /// Rejects payloads that could never replay successfully.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            SyncPayload::CreateTransaction(t) | SyncPayload::UpdateTransaction(t) => t.validate(),
            SyncPayload::CreateCalorieEntry(c) | SyncPayload::UpdateCalorieEntry(c) => c.validate(),
            SyncPayload::DeleteTransaction { id } | SyncPayload::DeleteCalorieEntry { id, .. } => {
                if id.trim().is_empty() {
                    Err(CoreError::ValidationError(
                        "delete operation needs an entity id".into(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// A local mutation the remote service has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncOperation {
    pub id: String,
    pub payload: SyncPayload,
    pub created_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PendingSyncOperation {
    pub fn new(payload: SyncPayload, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            created_at,
            attempt_count: 0,
            last_attempt_at: None,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    pub fn operation(&self) -> OperationKind {
        self.payload.operation()
    }

    pub fn entity_id(&self) -> &str {
        self.payload.entity_id()
    }

    /// Parked operations are kept but no longer retried automatically.
    pub fn is_parked(&self, max_attempts: u32) -> bool {
        self.attempt_count >= max_attempts
    }
}

/// Identifies the mutation an event is about.
///
/// `op_id` is `None` when the mutation never reached the queue (rejected on the
/// command path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRef {
    pub op_id: Option<String>,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: OperationKind,
}

impl OperationRef {
    pub fn queued(op: &PendingSyncOperation) -> Self {
        Self {
            op_id: Some(op.id.clone()),
            entity_type: op.entity_type(),
            entity_id: op.entity_id().to_string(),
            operation: op.operation(),
        }
    }

    pub fn direct(payload: &SyncPayload) -> Self {
        Self {
            op_id: None,
            entity_type: payload.entity_type(),
            entity_id: payload.entity_id().to_string(),
            operation: payload.operation(),
        }
    }
}

/// Tally of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Confirmed by the remote service and removed from the queue.
    pub replayed: usize,
    /// Failed with a retryable error and still under the attempt cap.
    pub failed: usize,
    /// Failed and reached the attempt cap on this pass.
    pub parked: usize,
    /// Rejected as terminal and dropped from the queue.
    pub rejected: usize,
    /// Not attempted because an earlier operation for the same entity is failing or parked.
    pub skipped: usize,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.replayed + self.failed + self.parked + self.rejected
    }
}

/// Out-of-band sync notifications for observers (UI badges, logs, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Replayed(OperationRef),
    RetryScheduled {
        operation: OperationRef,
        attempts: u32,
        reason: String,
    },
    /// Retry budget exhausted; the operation stays queued but is no longer replayed.
    Parked {
        operation: OperationRef,
        attempts: u32,
    },
    /// Terminal remote failure; the mutation will not be retried.
    Rejected {
        operation: OperationRef,
        status: Option<u16>,
        message: String,
    },
    DrainFinished(DrainReport),
}

impl SyncEvent {
    /// The error this event reports, if any.
    pub fn to_error(&self) -> Option<CoreError> {
        match self {
            SyncEvent::Parked {
                operation,
                attempts,
            } => Some(CoreError::MaxAttemptsExceeded {
                operation_id: operation.op_id.clone().unwrap_or_default(),
                attempts: *attempts,
            }),
            SyncEvent::Rejected {
                status, message, ..
            } => Some(CoreError::RemoteTerminal {
                status: *status,
                message: message.clone(),
            }),
            _ => None,
        }
    }
}
