use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::connectivity::ConnectivityMonitor;
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::errors::CoreError;
use crate::models::sync::{DrainReport, EntityType, OperationRef, SyncEvent, SyncPayload};
use crate::remote::{replay_with_timeout, RemoteApi, RemoteOutcome};
use crate::storage::LocalStore;

/// Replays queued mutations against the remote service.
///
/// A pass runs when connectivity comes back and on a fixed interval while
/// online. At most one pass is in flight; triggers arriving meanwhile are
/// dropped. Operations are replayed in FIFO order, and once one of an
/// entity's operations fails (or is parked) the entity's later operations
/// wait for the next pass.
pub struct SyncDrainer {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteApi>,
    connectivity: Arc<ConnectivityMonitor>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    interval: Duration,
    remote_timeout: Duration,
    events: broadcast::Sender<SyncEvent>,
    draining: AtomicBool,
    task: Mutex<Option<RunningLoop>>,
}

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Clears the in-flight flag however the pass ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncDrainer {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<ConnectivityMonitor>,
        clock: Arc<dyn Clock>,
        config: &CoreConfig,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            clock,
            max_attempts: config.max_attempts,
            interval: config.drain_interval(),
            remote_timeout: config.remote_timeout(),
            events,
            draining: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.lock_task().is_some()
    }

    /// Run one pass now. Returns `None` when another pass is already in flight.
    ///
    /// Never fails: replay failures are recorded on the queue, and a local
    /// storage fault ends the pass early and is logged.
    pub async fn drain(&self) -> Option<DrainReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in flight; trigger ignored");
            return None;
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        if let Err(e) = self.drain_pass(&mut report).await {
            error!(error = %e, "Drain stopped by local storage fault");
        }
        if report.attempted() > 0 || report.skipped > 0 {
            info!(
                replayed = report.replayed,
                failed = report.failed,
                parked = report.parked,
                rejected = report.rejected,
                skipped = report.skipped,
                "Drain finished"
            );
        }
        self.emit(SyncEvent::DrainFinished(report.clone()));
        Some(report)
    }

    async fn drain_pass(&self, report: &mut DrainReport) -> Result<(), CoreError> {
        let ops = self.store.list_retryable(self.max_attempts)?;
        if ops.is_empty() {
            return Ok(());
        }

        // Entities with a parked operation stay blocked until it is re-enabled or removed.
        let mut blocked: HashSet<(EntityType, String)> = self
            .store
            .list_parked(self.max_attempts)?
            .iter()
            .map(|op| (op.entity_type(), op.entity_id().to_string()))
            .collect();
        debug!(pending = ops.len(), blocked = blocked.len(), "Draining sync queue");

        for op in ops {
            let key = (op.entity_type(), op.entity_id().to_string());
            if blocked.contains(&key) {
                report.skipped += 1;
                continue;
            }

            let payload = self.with_known_server_id(&op.payload)?;
            let outcome =
                replay_with_timeout(self.remote.as_ref(), &payload, self.remote_timeout).await;
            let now = self.clock.now();
            match outcome {
                RemoteOutcome::Success { server_id } => {
                    self.store.record_outcome(&op.id, true, now)?;
                    if let SyncPayload::CreateCalorieEntry(entry)
                    | SyncPayload::UpdateCalorieEntry(entry) = &payload
                    {
                        // Later queued edits still have to reach the service.
                        let rest = self.store.pending_for_entity(key.0, &key.1)?;
                        if rest.is_empty() {
                            self.store
                                .mark_calorie_entry_synced(&entry.id, server_id.as_deref())?;
                        } else if let Some(server_id) = server_id.as_deref() {
                            self.store.set_calorie_server_id(&entry.id, server_id)?;
                        }
                    }
                    report.replayed += 1;
                    debug!(op_id = %op.id, entity_id = %key.1, "Replayed sync operation");
                    self.emit(SyncEvent::Replayed(OperationRef::queued(&op)));
                }
                RemoteOutcome::Retryable(reason) => {
                    let attempts = self.store.record_outcome(&op.id, false, now)?;
                    blocked.insert(key);
                    if attempts >= self.max_attempts {
                        report.parked += 1;
                        let err = CoreError::MaxAttemptsExceeded {
                            operation_id: op.id.clone(),
                            attempts,
                        };
                        warn!(error = %err, %reason, "Parking sync operation");
                        self.emit(SyncEvent::Parked {
                            operation: OperationRef::queued(&op),
                            attempts,
                        });
                    } else {
                        report.failed += 1;
                        debug!(op_id = %op.id, attempts, %reason, "Replay failed; will retry");
                        self.emit(SyncEvent::RetryScheduled {
                            operation: OperationRef::queued(&op),
                            attempts,
                            reason,
                        });
                    }
                }
                RemoteOutcome::Terminal { status, message } => {
                    self.store.remove_pending(&op.id)?;
                    report.rejected += 1;
                    warn!(op_id = %op.id, ?status, %message, "Remote rejected queued operation; dropped");
                    self.emit(SyncEvent::Rejected {
                        operation: OperationRef::queued(&op),
                        status,
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    /// A calorie update queued before the service numbered the entry is sent
    /// with the server id recorded since.
    fn with_known_server_id(&self, payload: &SyncPayload) -> Result<SyncPayload, CoreError> {
        match payload {
            SyncPayload::UpdateCalorieEntry(entry) if entry.server_id.is_none() => {
                let mut entry = entry.clone();
                entry.server_id = self
                    .store
                    .get_calorie_entry(&entry.id)?
                    .and_then(|stored| stored.server_id);
                Ok(SyncPayload::UpdateCalorieEntry(entry))
            }
            other => Ok(other.clone()),
        }
    }

    /// Spawn the trigger loop. A no-op when it is already running.
    /// Must be called inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.lock_task();
        if task.is_some() {
            return;
        }
        let (shutdown, stopped) = oneshot::channel();
        // Transitions sent after `start` returns must reach the loop.
        let transitions = self.connectivity.subscribe();
        let handle = tokio::spawn(Self::run(
            Arc::downgrade(self),
            self.interval,
            stopped,
            transitions,
        ));
        *task = Some(RunningLoop { shutdown, handle });
        info!(interval_secs = self.interval.as_secs(), "Sync drainer started");
    }

    /// Stop the loop and its timer and subscription. A pass in flight is allowed to finish.
    pub async fn stop(&self) {
        if let Some(handle) = self.shutdown() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync drainer loop ended abnormally");
            }
            info!("Sync drainer stopped");
        }
    }

    /// Signal the loop to exit without waiting for it. Returns its handle if it was running.
    pub fn shutdown(&self) -> Option<JoinHandle<()>> {
        let RunningLoop { shutdown, handle } = self.lock_task().take()?;
        let _ = shutdown.send(());
        debug!("Sync drainer shutdown signalled");
        Some(handle)
    }

    /// Holds only a weak reference, so dropping the drainer also ends the loop.
    async fn run(
        drainer: Weak<Self>,
        period: Duration,
        mut stopped: oneshot::Receiver<()>,
        mut transitions: broadcast::Receiver<bool>,
    ) {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Anything left over from a previous session.
        if let Some(this) = drainer.upgrade() {
            if this.connectivity.is_online() {
                this.drain_coalesced(&mut transitions, &mut ticker).await;
            }
        }

        loop {
            let came_online = tokio::select! {
                biased;
                _ = &mut stopped => break,
                changed = transitions.recv() => match changed {
                    Ok(true) => true,
                    Ok(false) => {
                        debug!("Offline; drains paused");
                        continue;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Connectivity transitions lagged");
                        false
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => false,
            };
            let Some(this) = drainer.upgrade() else {
                break;
            };
            if came_online || this.connectivity.is_online() {
                this.drain_coalesced(&mut transitions, &mut ticker).await;
            }
        }
        debug!("Sync drainer loop exited");
    }

    /// One pass for every trigger that is already pending when it finishes.
    ///
    /// Transitions buffered during a pass are only dropped when the pass left
    /// nothing to retry and the device is still online; otherwise a reconnect
    /// that happened mid-pass gets its own pass.
    async fn drain_coalesced(
        &self,
        transitions: &mut broadcast::Receiver<bool>,
        ticker: &mut Interval,
    ) {
        let clean = match self.drain().await {
            Some(report) => report.failed == 0 && report.parked == 0,
            None => false,
        };
        if clean && self.connectivity.is_online() {
            loop {
                match transitions.try_recv() {
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        }
        ticker.reset();
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<RunningLoop>> {
        self.task.lock().unwrap_or_else(|p| p.into_inner())
    }
}
