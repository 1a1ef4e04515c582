//! Retryable action queue
//!
//! Holds actions that could not complete while offline (or during a
//! transient remote failure) until the next drain. Draining is strictly
//! FIFO and never aborts the batch on a single item's failure: every
//! queued item gets one attempt per cycle, and an item that exhausts its
//! retry budget is dropped with a recorded error rather than retried
//! forever.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::error::Result;
use crate::types::now_millis;

/// Kind of remote effect a queued action replays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    Subscribe,
    Unsubscribe,
}

/// Identifier of a queued action
pub type ActionId = Uuid;

/// An action awaiting replay against the remote service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: ActionId,
    pub kind: ActionKind,
    /// Action-specific payload (dashboard data, target id, ...)
    pub payload: serde_json::Value,
    /// Millisecond timestamp of enqueue
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Executes the effect of a queued action.
///
/// Supplied by the caller; the queue itself knows nothing about dashboards
/// or the remote API.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, action: &QueuedAction) -> Result<()>;
}

/// Outcome of one drain cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Actions attempted this cycle
    pub attempted: usize,
    /// Actions that succeeded and left the queue
    pub completed: usize,
    /// Actions dropped after exhausting their retry budget
    pub dropped: usize,
    /// One entry per dropped action
    pub errors: Vec<String>,
}

/// FIFO queue of retryable actions
pub struct ActionQueue {
    actions: Mutex<VecDeque<QueuedAction>>,
    draining: AtomicBool,
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    /// Append an action; returns its id for later correlation or removal
    pub fn enqueue(
        &self,
        kind: ActionKind,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> ActionId {
        let action = QueuedAction {
            id: Uuid::new_v4(),
            kind,
            payload,
            enqueued_at: now_millis(),
            retry_count: 0,
            max_retries,
        };
        let id = action.id;
        self.actions.lock().push_back(action);
        tracing::debug!("Enqueued {:?} action {}", kind, id);
        id
    }

    /// Remove an action by id; false if it was not queued
    pub fn dequeue(&self, id: ActionId) -> bool {
        let mut actions = self.actions.lock();
        let before = actions.len();
        actions.retain(|a| a.id != id);
        actions.len() < before
    }

    /// Snapshot of the queue, oldest first
    pub fn pending(&self) -> Vec<QueuedAction> {
        self.actions.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }

    pub fn clear(&self) {
        self.actions.lock().clear();
    }

    /// Attempt every queued action once, oldest first.
    ///
    /// Success removes the action; failure bumps its retry count and, once
    /// the budget is spent, drops it with one recorded error. Overlapping
    /// drains are rejected with an empty report — there is one logical
    /// thread of control and the guard keeps replays from interleaving.
    pub async fn drain(&self, handler: &dyn ActionHandler) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return DrainReport::default();
        }

        let mut report = DrainReport::default();
        let batch: Vec<QueuedAction> = {
            let actions = self.actions.lock();
            actions.iter().cloned().collect()
        };

        for mut action in batch {
            report.attempted += 1;
            match handler.execute(&action).await {
                Ok(()) => {
                    self.dequeue(action.id);
                    report.completed += 1;
                }
                Err(e) => {
                    action.retry_count += 1;
                    if action.retry_count >= action.max_retries {
                        self.dequeue(action.id);
                        report.dropped += 1;
                        let msg = format!(
                            "{:?} action {} dropped after {} attempts: {}",
                            action.kind, action.id, action.retry_count, e
                        );
                        tracing::warn!("{}", msg);
                        report.errors.push(msg);
                    } else {
                        let mut actions = self.actions.lock();
                        if let Some(queued) = actions.iter_mut().find(|a| a.id == action.id) {
                            queued.retry_count = action.retry_count;
                        }
                        tracing::debug!(
                            "{:?} action {} failed ({}/{}), keeping queued: {}",
                            action.kind,
                            action.id,
                            action.retry_count,
                            action.max_retries,
                            e
                        );
                    }
                }
            }
        }

        self.draining.store(false, Ordering::Release);
        report
    }
}
