use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::models::calorie::CalorieEntry;
use crate::models::sync::SyncPayload;
use crate::models::transaction::Transaction;

/// Result of one remote mutation call.
///
/// Not a `Result`: every caller has to decide what a retryable versus a
/// terminal failure means at its call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Accepted. Carries the server-side id when the service returns one.
    Success { server_id: Option<String> },
    /// Network unreachable, timeout, 5xx: worth replaying later.
    Retryable(String),
    /// 4xx / validation failure: replaying the same mutation cannot succeed.
    Terminal {
        status: Option<u16>,
        message: String,
    },
}

impl RemoteOutcome {
    pub fn success() -> Self {
        RemoteOutcome::Success { server_id: None }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RemoteOutcome::Success { .. })
    }

    /// Classify an HTTP status code. Request timeout and rate limiting count as retryable.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            200..=299 => RemoteOutcome::success(),
            408 | 429 | 500..=599 => RemoteOutcome::Retryable(format!("status {status}: {body}")),
            _ => RemoteOutcome::Terminal {
                status: Some(status),
                message: body.to_string(),
            },
        }
    }
}

/// The remote mutation API shared by the command path and the sync drainer.
///
/// The concrete transport (HTTP/JSON with auth) lives behind this trait so
/// both callers, and tests, only depend on the outcome contract.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_transaction(&self, transaction: &Transaction) -> RemoteOutcome;

    async fn update_transaction(&self, transaction: &Transaction) -> RemoteOutcome;

    async fn delete_transaction(&self, id: &str) -> RemoteOutcome;

    async fn create_calorie_entry(&self, entry: &CalorieEntry) -> RemoteOutcome;

    async fn update_calorie_entry(&self, entry: &CalorieEntry) -> RemoteOutcome;

    /// `id` is the entry's server id when one is known, the client id otherwise.
    async fn delete_calorie_entry(&self, id: &str) -> RemoteOutcome;

    /// Dispatch a queued payload to the matching method.
    async fn replay(&self, payload: &SyncPayload) -> RemoteOutcome {
        match payload {
            SyncPayload::CreateTransaction(t) => self.create_transaction(t).await,
            SyncPayload::UpdateTransaction(t) => self.update_transaction(t).await,
            SyncPayload::DeleteTransaction { id } => self.delete_transaction(id).await,
            SyncPayload::CreateCalorieEntry(c) => self.create_calorie_entry(c).await,
            SyncPayload::UpdateCalorieEntry(c) => self.update_calorie_entry(c).await,
            SyncPayload::DeleteCalorieEntry { id, server_id } => {
                self.delete_calorie_entry(server_id.as_deref().unwrap_or(id)).await
            }
        }
    }
}

/// Replay `payload` with an upper bound on how long the call may take.
/// Hitting the bound counts as a retryable failure.
pub async fn replay_with_timeout(
    remote: &dyn RemoteApi,
    payload: &SyncPayload,
    limit: Duration,
) -> RemoteOutcome {
    match tokio::time::timeout(limit, remote.replay(payload)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                entity = %payload.entity_type(),
                entity_id = payload.entity_id(),
                timeout_ms = limit.as_millis() as u64,
                "Remote call timed out"
            );
            RemoteOutcome::Retryable(format!("timed out after {}ms", limit.as_millis()))
        }
    }
}
