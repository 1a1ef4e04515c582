//! Offline-first synchronization layer
//!
//! Presents a CRUD facade over dashboards that stays correct whether or
//! not the remote service is reachable: reads prefer remote-when-online
//! and fall back to the local store, writes land locally first and are
//! replayed against the remote, and divergent concurrent edits are
//! surfaced and resolved rather than hidden.

pub mod conflict;
mod repository;

pub use conflict::{
    detect, resolve, shallow_merge, ConflictInfo, ResolutionStrategy, ResolvedConflict,
};
pub use repository::SyncRepository;

/// Outcome of one bulk sync run.
///
/// Never partially constructed: callers see either a fully populated
/// result or a refusal (also expressed as a result) naming why the run
/// could not start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    pub success: bool,
    /// Entries whose remote replay succeeded
    pub synced_count: usize,
    /// Conflicts detected and resolved during the run
    pub conflict_count: usize,
    /// One entry per failed item or refusal reason
    pub errors: Vec<String>,
}

impl SyncResult {
    /// A run that could not start
    pub(crate) fn refused(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            synced_count: 0,
            conflict_count: 0,
            errors: vec![reason.into()],
        }
    }
}
