//! Boardsync - Offline-First Dashboard Sync
//!
//! Local-first persistence, connectivity tracking, and conflict
//! resolution for dashboard data that must stay usable while the
//! backing service is unreachable.

pub mod error;
pub mod net;
pub mod remote;
pub mod store;
pub mod sync;
pub mod types;

pub use error::{BoardsyncError, RemoteError, Result};
pub use net::ConnectivityMonitor;
pub use remote::{HttpRemoteApi, RemoteApi};
pub use store::{DurableStore, StoredEntry};
pub use sync::{ResolutionStrategy, SyncRepository, SyncResult};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
