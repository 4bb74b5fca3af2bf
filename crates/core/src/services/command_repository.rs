use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::errors::CoreError;
use crate::models::calorie::CalorieEntry;
use crate::models::sync::{
    EntityType, OperationKind, OperationRef, PendingSyncOperation, SyncEvent, SyncPayload,
};
use crate::models::transaction::Transaction;
use crate::remote::{replay_with_timeout, RemoteApi, RemoteOutcome};
use crate::storage::LocalStore;

/// What happened on the remote side of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Confirmed by the remote service.
    Synced,
    /// Durable locally and waiting in the sync queue.
    Queued,
    /// Pending operations for an entity the service never saw were dropped;
    /// nothing had to be sent.
    Discarded,
    /// The service refused the mutation. It stays applied locally and is not retried.
    Rejected {
        status: Option<u16>,
        message: String,
    },
}

/// Outcome of a successful local mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReceipt {
    pub id: String,
    pub remote: RemoteStatus,
}

/// Write path: local store first, then the remote call, then the queue on failure.
///
/// A returned `Ok` means the mutation is durable and readable locally. Only
/// validation and local storage faults are returned as errors; remote
/// outcomes are reported in the receipt.
///
/// Mutations for an entity that already has queued operations are queued
/// behind them without a remote call, so the service always sees one
/// entity's operations in the order they were made.
pub struct CommandRepository {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteApi>,
    clock: Arc<dyn Clock>,
    remote_timeout: Duration,
    events: broadcast::Sender<SyncEvent>,
}

impl CommandRepository {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
        remote_timeout: Duration,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            store,
            remote,
            clock,
            remote_timeout,
            events,
        }
    }

    // ── Transactions ────────────────────────────────────────────────

    pub async fn add_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<MutationReceipt, CoreError> {
        transaction.validate()?;
        self.store.insert_transaction(&transaction)?;
        debug!(id = %transaction.id, category = %transaction.category, "Stored transaction");
        self.dispatch(SyncPayload::CreateTransaction(transaction)).await
    }

    /// Full-row replace of an existing transaction.
    pub async fn update_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<MutationReceipt, CoreError> {
        transaction.validate()?;
        self.store.update_transaction(&transaction)?;
        debug!(id = %transaction.id, "Updated transaction");
        self.dispatch(SyncPayload::UpdateTransaction(transaction)).await
    }

    pub async fn delete_transaction(&self, id: &str) -> Result<MutationReceipt, CoreError> {
        if !self.store.delete_transaction(id)? {
            return Err(CoreError::not_found("Transaction", id));
        }
        debug!(id, "Deleted transaction");
        self.dispatch_delete(SyncPayload::DeleteTransaction { id: id.to_string() })
            .await
    }

    // ── Calorie entries ─────────────────────────────────────────────

    pub async fn add_calorie_entry(
        &self,
        mut entry: CalorieEntry,
    ) -> Result<MutationReceipt, CoreError> {
        entry.validate()?;
        entry.synced = false;
        self.store.insert_calorie_entry(&entry)?;
        debug!(id = %entry.id, food = %entry.food_item, "Stored calorie entry");
        self.dispatch(SyncPayload::CreateCalorieEntry(entry)).await
    }

    /// Full-row replace. The entry is unsynced until the service confirms the
    /// change; the server id already assigned is kept.
    pub async fn update_calorie_entry(
        &self,
        mut entry: CalorieEntry,
    ) -> Result<MutationReceipt, CoreError> {
        entry.validate()?;
        let existing = self
            .store
            .get_calorie_entry(&entry.id)?
            .ok_or_else(|| CoreError::not_found("CalorieEntry", &entry.id))?;
        entry.synced = false;
        if entry.server_id.is_none() {
            entry.server_id = existing.server_id;
        }
        self.store.update_calorie_entry(&entry)?;
        debug!(id = %entry.id, "Updated calorie entry");
        self.dispatch(SyncPayload::UpdateCalorieEntry(entry)).await
    }

    pub async fn delete_calorie_entry(&self, id: &str) -> Result<MutationReceipt, CoreError> {
        let server_id = self
            .store
            .get_calorie_entry(id)?
            .and_then(|entry| entry.server_id);
        if !self.store.delete_calorie_entry(id)? {
            return Err(CoreError::not_found("CalorieEntry", id));
        }
        debug!(id, ?server_id, "Deleted calorie entry");
        self.dispatch_delete(SyncPayload::DeleteCalorieEntry {
            id: id.to_string(),
            server_id,
        })
        .await
    }

    // ── Remote side ─────────────────────────────────────────────────

    /// Deleting an entity whose create is still queued: the service never saw
    /// it, so every queued operation for it is dropped and nothing is sent.
    /// Otherwise queued updates are superseded by the delete.
    async fn dispatch_delete(&self, payload: SyncPayload) -> Result<MutationReceipt, CoreError> {
        let entity_type = payload.entity_type();
        let entity_id = payload.entity_id().to_string();
        let pending = self.store.pending_for_entity(entity_type, &entity_id)?;

        if pending.iter().any(|op| op.operation() == OperationKind::Create) {
            let removed = self
                .store
                .remove_pending_for_entity(entity_type, &entity_id)?;
            info!(
                entity = %entity_type,
                entity_id = %entity_id,
                removed,
                "Entity deleted before its create was synced; dropped queued operations"
            );
            return Ok(MutationReceipt {
                id: entity_id,
                remote: RemoteStatus::Discarded,
            });
        }

        for op in pending
            .iter()
            .filter(|op| op.operation() == OperationKind::Update)
        {
            self.store.remove_pending(&op.id)?;
            debug!(op_id = %op.id, entity_id = %entity_id, "Queued update superseded by delete");
        }
        self.dispatch(payload).await
    }

    async fn dispatch(&self, payload: SyncPayload) -> Result<MutationReceipt, CoreError> {
        let entity_type = payload.entity_type();
        let id = payload.entity_id().to_string();

        if !self.store.pending_for_entity(entity_type, &id)?.is_empty() {
            debug!(entity = %entity_type, entity_id = %id, "Entity has queued operations; queueing behind them");
            self.enqueue(payload)?;
            return Ok(MutationReceipt {
                id,
                remote: RemoteStatus::Queued,
            });
        }

        let outcome =
            replay_with_timeout(self.remote.as_ref(), &payload, self.remote_timeout).await;
        let remote = match outcome {
            RemoteOutcome::Success { server_id } => {
                self.acknowledge(&payload, server_id.as_deref())?;
                debug!(entity = %entity_type, entity_id = %id, operation = %payload.operation(), "Remote confirmed mutation");
                RemoteStatus::Synced
            }
            RemoteOutcome::Retryable(reason) => {
                info!(entity = %entity_type, entity_id = %id, %reason, "Remote unavailable; queued for sync");
                self.enqueue(payload)?;
                RemoteStatus::Queued
            }
            RemoteOutcome::Terminal { status, message } => {
                warn!(entity = %entity_type, entity_id = %id, ?status, %message, "Remote rejected mutation");
                let _ = self.events.send(SyncEvent::Rejected {
                    operation: OperationRef::direct(&payload),
                    status,
                    message: message.clone(),
                });
                RemoteStatus::Rejected { status, message }
            }
        };
        Ok(MutationReceipt { id, remote })
    }

    fn acknowledge(&self, payload: &SyncPayload, server_id: Option<&str>) -> Result<(), CoreError> {
        match payload {
            SyncPayload::CreateCalorieEntry(entry) | SyncPayload::UpdateCalorieEntry(entry) => {
                self.store.mark_calorie_entry_synced(&entry.id, server_id)
            }
            _ => Ok(()),
        }
    }

    fn enqueue(&self, payload: SyncPayload) -> Result<(), CoreError> {
        let op = PendingSyncOperation::new(payload, self.clock.now());
        self.store.enqueue(&op)
    }

    /// Queued operations (parked ones included) for one entity.
    pub fn pending_for(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Vec<PendingSyncOperation>, CoreError> {
        self.store.pending_for_entity(entity_type, id)
    }
}
