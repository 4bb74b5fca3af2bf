use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Raw link types as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityKind {
    Wifi,
    Mobile,
    Ethernet,
    Vpn,
    Bluetooth,
    Other,
    None,
}

/// True when at least one link other than `None` is up.
pub fn has_connectivity(kinds: &[ConnectivityKind]) -> bool {
    kinds.iter().any(|k| *k != ConnectivityKind::None)
}

const TRANSITION_CAPACITY: usize = 16;

/// Normalises platform signals into a de-duplicated online/offline stream.
///
/// Every subscriber gets every transition; repeating the current state emits
/// nothing.
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    transitions: broadcast::Sender<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            state,
            transitions,
            pump: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Feed a raw platform reading. Returns whether the online state changed.
    pub fn report(&self, kinds: &[ConnectivityKind]) -> bool {
        self.set_online(has_connectivity(kinds))
    }

    /// Returns whether the online state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(online, "Connectivity changed");
            // No subscribers is fine.
            let _ = self.transitions.send(online);
        }
        changed
    }

    /// Stream of transitions from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.transitions.subscribe()
    }

    /// Latest-value view of the state.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Pump readings from a platform source until it closes or [`stop`](Self::stop) is called.
    /// Replaces any previously attached source. Must be called inside a tokio runtime.
    pub fn attach(self: &Arc<Self>, mut source: mpsc::Receiver<Vec<ConnectivityKind>>) {
        let monitor: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(kinds) = source.recv().await {
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.report(&kinds);
            }
            debug!("Connectivity source closed");
        });
        if let Some(previous) = self.replace_pump(Some(handle)) {
            previous.abort();
        }
    }

    /// Detach the platform source, if any.
    pub fn stop(&self) {
        if let Some(handle) = self.replace_pump(None) {
            handle.abort();
            debug!("Connectivity source detached");
        }
    }

    fn replace_pump(&self, handle: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut pump = self.pump.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *pump, handle)
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
