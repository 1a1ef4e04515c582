//! Conflict detection and resolution
//!
//! Conflicts are single-key and last-writer-style: a local entry diverged
//! from the server copy of the same dashboard. Detection compares logical
//! versions and modification timestamps; resolution applies one of three
//! caller-selectable strategies. There is no semantic merging of nested
//! structures.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::ResolutionTag;
use crate::types::Dashboard;

/// Caller-selectable conflict resolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Keep local data; the remote copy is overwritten on the next push
    Local,
    /// Discard local divergence and adopt the remote copy
    #[default]
    Server,
    /// Shallow merge with local fields taking precedence.
    ///
    /// Intentionally naive: only top-level fields are merged, so nested
    /// widget and layout structures are taken wholesale from whichever
    /// side owns the winning field. Documented rather than guessed.
    Merge,
}

impl ResolutionStrategy {
    pub fn tag(self) -> ResolutionTag {
        match self {
            ResolutionStrategy::Local => ResolutionTag::Local,
            ResolutionStrategy::Server => ResolutionTag::Server,
            ResolutionStrategy::Merge => ResolutionTag::Merge,
        }
    }
}

/// Computed divergence between a local entry and the server copy.
///
/// Never stored; recomputed on every online read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub local_version: i64,
    pub server_version: i64,
    /// Millisecond timestamp of the local entry's last write
    pub local_timestamp: i64,
    /// Millisecond timestamp reported by the server
    pub server_timestamp: i64,
    pub has_conflict: bool,
}

/// Compare a local entry's metadata against the server's.
///
/// A conflict exists only when the versions differ AND the local copy was
/// modified strictly after the server's reported timestamp. A merely
/// stale local copy (older than the server) is not a conflict; the server
/// value simply wins.
pub fn detect(
    local_version: i64,
    local_timestamp: i64,
    server_version: i64,
    server_timestamp: i64,
) -> ConflictInfo {
    let has_conflict = local_version != server_version && local_timestamp > server_timestamp;
    ConflictInfo {
        local_version,
        server_version,
        local_timestamp,
        server_timestamp,
        has_conflict,
    }
}

/// Outcome of resolving a conflict
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConflict {
    pub dashboard: Dashboard,
    /// Version to persist with the resolved entry
    pub version: i64,
    pub tag: ResolutionTag,
}

/// Resolve a detected conflict deterministically per the strategy.
pub fn resolve(
    strategy: ResolutionStrategy,
    local: &Dashboard,
    local_version: i64,
    server: &Dashboard,
    server_version: i64,
) -> Result<ResolvedConflict> {
    let resolved = match strategy {
        ResolutionStrategy::Local => ResolvedConflict {
            dashboard: local.clone(),
            version: local_version,
            tag: ResolutionTag::Local,
        },
        ResolutionStrategy::Server => ResolvedConflict {
            dashboard: server.clone(),
            version: server_version,
            tag: ResolutionTag::Server,
        },
        ResolutionStrategy::Merge => {
            let merged = shallow_merge(
                &serde_json::to_value(server)?,
                &serde_json::to_value(local)?,
            );
            ResolvedConflict {
                dashboard: serde_json::from_value(merged)?,
                version: local_version.max(server_version) + 1,
                tag: ResolutionTag::Merge,
            }
        }
    };
    Ok(resolved)
}

/// One-level object merge: server fields as the base, local fields on top.
///
/// Non-object inputs fall back to the local value entirely.
pub fn shallow_merge(
    server: &serde_json::Value,
    local: &serde_json::Value,
) -> serde_json::Value {
    match (server.as_object(), local.as_object()) {
        (Some(server), Some(local)) => {
            let mut merged = server.clone();
            for (key, value) in local {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => local.clone(),
    }
}
