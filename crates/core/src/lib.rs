pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod remote;
pub mod services;
pub mod storage;
pub mod telemetry;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use clock::Clock;
use config::CoreConfig;
use errors::CoreError;
use models::sync::{DrainReport, PendingSyncOperation, SyncEvent};
use remote::RemoteApi;
use services::{
    CacheTtls, CommandRepository, ConnectivityMonitor, QueryRepository, SyncDrainer,
};
use storage::LocalStore;

const EVENT_CAPACITY: usize = 64;

/// Main entry point for the PocketLog core library.
///
/// Built once by the application and passed to whatever needs it; there is
/// no global instance. Writes go through [`commands`](Self::commands), reads
/// through [`queries`](Self::queries). Connectivity readings are fed into
/// [`connectivity`](Self::connectivity), which starts out offline.
///
/// [`start`](Self::start) spawns the background drainer and must be called
/// from inside a tokio runtime; [`stop`](Self::stop) tears down its timer and
/// subscriptions together. Dropping the value does the same without waiting
/// for a pass in flight.
#[must_use]
pub struct PocketLog {
    config: CoreConfig,
    store: Arc<LocalStore>,
    connectivity: Arc<ConnectivityMonitor>,
    commands: CommandRepository,
    queries: QueryRepository,
    drainer: Arc<SyncDrainer>,
    events: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for PocketLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PocketLog")
            .field("online", &self.connectivity.is_online())
            .field("drainer_running", &self.drainer.is_running())
            .field("max_attempts", &self.config.max_attempts)
            .finish()
    }
}

impl Drop for PocketLog {
    fn drop(&mut self) {
        if self.drainer.shutdown().is_some() {
            debug!("PocketLog dropped while running; background sync signalled to exit");
        }
        self.connectivity.stop();
    }
}

impl PocketLog {
    /// Open the on-disk store named by `config` and wire every component.
    pub fn open(
        config: CoreConfig,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let path = config.resolved_database_path()?;
        let store = Arc::new(LocalStore::open(&path)?);
        Self::with_store(config, store, remote, clock)
    }

    /// Wire every component around an already opened store.
    pub fn with_store(
        config: CoreConfig,
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connectivity = Arc::new(ConnectivityMonitor::new(false));

        let commands = CommandRepository::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&clock),
            config.remote_timeout(),
            events.clone(),
        );
        let queries = QueryRepository::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            CacheTtls::from_config(&config),
        );
        let drainer = Arc::new(SyncDrainer::new(
            Arc::clone(&store),
            remote,
            Arc::clone(&connectivity),
            clock,
            &config,
            events.clone(),
        ));

        Ok(Self {
            config,
            store,
            connectivity,
            commands,
            queries,
            drainer,
            events,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn commands(&self) -> &CommandRepository {
        &self.commands
    }

    pub fn queries(&self) -> &QueryRepository {
        &self.queries
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn drainer(&self) -> &Arc<SyncDrainer> {
        &self.drainer
    }

    /// Sync notifications from both the command path and the drainer.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    pub fn start(&self) {
        self.drainer.start();
    }

    pub async fn stop(&self) {
        self.drainer.stop().await;
        self.connectivity.stop();
        info!("PocketLog stopped");
    }

    /// Drain the queue now, regardless of the timer. `None` if a pass is already running.
    pub async fn sync_now(&self) -> Option<DrainReport> {
        self.drainer.drain().await
    }

    // ── Queue maintenance ───────────────────────────────────────────

    /// Everything still waiting for the remote service, parked operations included.
    pub fn pending_operations(&self) -> Result<Vec<PendingSyncOperation>, CoreError> {
        self.store.list_pending()
    }

    pub fn parked_operations(&self) -> Result<Vec<PendingSyncOperation>, CoreError> {
        self.store.list_parked(self.config.max_attempts)
    }

    /// Give a parked operation a fresh retry budget; it is picked up by the next pass.
    pub fn reenable_operation(&self, op_id: &str) -> Result<(), CoreError> {
        self.store.reenable(op_id)?;
        info!(op_id, "Re-enabled parked sync operation");
        Ok(())
    }

    /// Give up on a queued operation without replaying it.
    pub fn discard_operation(&self, op_id: &str) -> Result<(), CoreError> {
        if !self.store.remove_pending(op_id)? {
            return Err(CoreError::not_found("PendingSyncOperation", op_id));
        }
        info!(op_id, "Discarded sync operation");
        Ok(())
    }

    /// Maintenance: drop every derived cache. Entities and the queue are kept.
    pub fn clear_caches(&self) -> Result<(), CoreError> {
        self.store.clear_caches()
    }
}
