//! Connectivity monitor
//!
//! Single source of truth for online/offline state. Combines host-level
//! connectivity signals with an active reachability probe on a timer, and
//! owns the retry queue for actions that could not complete while offline.
//!
//! The background task follows the worker pattern used across the crate:
//! a spawned loop multiplexing an mpsc command channel with interval
//! ticks, stopped by an explicit command.

mod probe;
pub mod queue;

pub use probe::{HttpProbe, ReachabilityProbe};
pub use queue::{ActionHandler, ActionId, ActionKind, ActionQueue, DrainReport, QueuedAction};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::error::{BoardsyncError, Result};
use crate::types::{now_millis, SyncConfig};

/// Current connectivity state.
///
/// Transitions strictly alternate online/offline; each transition stamps
/// the corresponding timestamp. Same-state reports are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub is_online: bool,
    /// Millisecond timestamp of the last offline-to-online transition
    pub last_online: Option<i64>,
    /// Millisecond timestamp of the last online-to-offline transition
    pub last_offline: Option<i64>,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        // Optimistic start, corrected by the first probe
        Self {
            is_online: true,
            last_online: None,
            last_offline: None,
        }
    }
}

/// Handle to a registered status listener
pub type ListenerId = u64;

type Listener = Box<dyn Fn(&NetworkStatus) + Send + Sync>;

/// Commands for the monitor's background task
#[derive(Debug)]
enum MonitorCommand {
    ProbeNow,
    DrainNow,
    Stop,
}

struct MonitorInner {
    status: Mutex<NetworkStatus>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    queue: ActionQueue,
}

impl MonitorInner {
    /// Apply a connectivity report. Returns true when the state changed.
    fn transition(&self, online: bool) -> bool {
        let snapshot = {
            let mut status = self.status.lock();
            if status.is_online == online {
                return false;
            }
            status.is_online = online;
            if online {
                status.last_online = Some(now_millis());
            } else {
                status.last_offline = Some(now_millis());
            }
            status.clone()
        };

        tracing::info!(
            "Connectivity changed: {}",
            if online { "online" } else { "offline" }
        );

        // Synchronous delivery, registration order; part of the contract.
        let listeners = self.listeners.lock();
        for (_, listener) in listeners.iter() {
            listener(&snapshot);
        }
        true
    }
}

/// Tracks online/offline transitions and owns the retryable action queue
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
    probe_interval: std::time::Duration,
    drain_interval: std::time::Duration,
    default_max_retries: u32,
    commands: Mutex<Option<mpsc::Sender<MonitorCommand>>>,
}

impl ConnectivityMonitor {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                status: Mutex::new(NetworkStatus::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                queue: ActionQueue::new(),
            }),
            probe_interval: config.probe_interval,
            drain_interval: config.drain_interval,
            default_max_retries: config.default_max_retries,
            commands: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn is_online(&self) -> bool {
        self.inner.status.lock().is_online
    }

    pub fn status(&self) -> NetworkStatus {
        self.inner.status.lock().clone()
    }

    /// Host-level connect signal (e.g., the shell's own network event).
    ///
    /// A reconnect asks the background task for an immediate drain so
    /// queued actions do not wait for the next drain tick.
    pub fn notify_online(&self) -> bool {
        let changed = self.inner.transition(true);
        if changed {
            if let Some(sender) = self.commands.lock().as_ref() {
                let _ = sender.try_send(MonitorCommand::DrainNow);
            }
        }
        changed
    }

    /// Host-level disconnect signal
    pub fn notify_offline(&self) -> bool {
        self.inner.transition(false)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a listener fired synchronously on every transition,
    /// in registration order.
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, listener));
        id
    }

    /// Remove a listener; false if the handle was unknown
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() < before
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    pub fn enqueue(&self, kind: ActionKind, payload: serde_json::Value) -> ActionId {
        self.inner.queue.enqueue(kind, payload, self.default_max_retries)
    }

    pub fn enqueue_with_retries(
        &self,
        kind: ActionKind,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> ActionId {
        self.inner.queue.enqueue(kind, payload, max_retries)
    }

    pub fn dequeue(&self, id: ActionId) -> bool {
        self.inner.queue.dequeue(id)
    }

    pub fn pending_actions(&self) -> Vec<QueuedAction> {
        self.inner.queue.pending()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn clear_queue(&self) {
        self.inner.queue.clear()
    }

    /// Drain the queue once, immediately.
    ///
    /// The background task calls this on reconnect and on its drain timer;
    /// it is public so callers (and tests) can force a cycle.
    pub async fn drain_now(&self, handler: &dyn ActionHandler) -> DrainReport {
        self.inner.queue.drain(handler).await
    }

    /// Run one probe cycle and apply the resulting transition.
    /// Returns the probed state.
    pub async fn probe_once(&self, probe: &dyn ReachabilityProbe) -> bool {
        let online = probe.check().await;
        self.inner.transition(online);
        online
    }

    // ------------------------------------------------------------------
    // Background task
    // ------------------------------------------------------------------

    /// Spawn the periodic probe/drain loop.
    ///
    /// The probe tick re-evaluates reachability regardless of host
    /// signals; the drain tick replays queued actions while online, and an
    /// offline-to-online transition drains immediately.
    pub fn start(&self, probe: Arc<dyn ReachabilityProbe>, handler: Arc<dyn ActionHandler>) {
        let (sender, mut receiver) = mpsc::channel::<MonitorCommand>(16);
        *self.commands.lock() = Some(sender);

        let inner = Arc::clone(&self.inner);
        let probe_period = self.probe_interval;
        let drain_period = self.drain_interval;

        tokio::spawn(async move {
            let mut probe_tick = interval(probe_period);
            let mut drain_tick = interval(drain_period);
            // The first tick of a tokio interval fires immediately
            probe_tick.tick().await;
            drain_tick.tick().await;

            loop {
                tokio::select! {
                    Some(cmd) = receiver.recv() => match cmd {
                        MonitorCommand::ProbeNow => {
                            let online = probe.check().await;
                            let changed = inner.transition(online);
                            if online && changed {
                                inner.queue.drain(handler.as_ref()).await;
                            }
                        }
                        MonitorCommand::DrainNow => {
                            if inner.status.lock().is_online {
                                inner.queue.drain(handler.as_ref()).await;
                            }
                        }
                        MonitorCommand::Stop => break,
                    },
                    _ = probe_tick.tick() => {
                        let online = probe.check().await;
                        let changed = inner.transition(online);
                        if online && changed {
                            // Reconnected: replay without waiting for the
                            // drain timer
                            inner.queue.drain(handler.as_ref()).await;
                        }
                    }
                    _ = drain_tick.tick() => {
                        if inner.status.lock().is_online && !inner.queue.is_empty() {
                            inner.queue.drain(handler.as_ref()).await;
                        }
                    }
                }
            }

            tracing::info!("Connectivity monitor stopped");
        });
    }

    /// Ask the background task for an immediate probe
    pub async fn request_probe(&self) -> Result<()> {
        self.send(MonitorCommand::ProbeNow).await
    }

    /// Ask the background task for an immediate drain
    pub async fn request_drain(&self) -> Result<()> {
        self.send(MonitorCommand::DrainNow).await
    }

    async fn send(&self, cmd: MonitorCommand) -> Result<()> {
        let sender = self.commands.lock().clone();
        match sender {
            Some(sender) => sender
                .send(cmd)
                .await
                .map_err(|_| BoardsyncError::Sync("Monitor task stopped".to_string())),
            None => Err(BoardsyncError::Sync("Monitor task not started".to_string())),
        }
    }

    /// Stop the background task and release all listeners
    pub async fn destroy(&self) {
        let sender = self.commands.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(MonitorCommand::Stop).await;
        }
        self.inner.listeners.lock().clear();
    }
}
