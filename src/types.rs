//! Core types for Boardsync
//!
//! Domain objects for the dashboard sync layer plus the runtime
//! configuration. Persistence metadata (`StoredEntry`) lives in
//! [`crate::store`]; queue types live in [`crate::net`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Current time as milliseconds since the Unix epoch.
///
/// All store metadata timestamps use this representation; versions default
/// to it as well so an unsynced entry still orders after older ones.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A dashboard as exchanged with the remote API and cached locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    /// Server-assigned id, or a `temp_` id for offline creates
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub widgets: Vec<Widget>,
    /// Grid layout configuration, opaque to the sync layer
    #[serde(default)]
    pub layout: serde_json::Value,
    /// Server-side logical version
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dashboard {
    /// True for locally created dashboards not yet acknowledged by the server
    pub fn has_temp_id(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }
}

/// Prefix for locally assigned dashboard ids
pub const TEMP_ID_PREFIX: &str = "temp_";

/// A widget on a dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub widget_type: String,
    pub title: String,
    /// Widget-specific configuration (data source, refresh rate, ...)
    #[serde(default)]
    pub config: serde_json::Value,
    pub position: WidgetPosition,
}

/// Position of a widget on the dashboard grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WidgetPosition {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Input for creating a dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDashboardInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub widgets: Vec<Widget>,
    #[serde(default)]
    pub layout: serde_json::Value,
}

/// Partial update for a dashboard.
///
/// All fields are optional; only present fields are applied. This is the
/// explicit counterpart of a dynamic object spread: the merge is a plain
/// function, not a serialization trick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets: Option<Vec<Widget>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<serde_json::Value>,
}

impl DashboardPatch {
    /// Apply this patch to a dashboard, refreshing its modification
    /// timestamp. The version is not touched here: versions are
    /// server-assigned, so a local patch against an unchanged server copy
    /// stays at the same version and replays without divergence.
    pub fn apply(&self, dashboard: &mut Dashboard) {
        if let Some(name) = &self.name {
            dashboard.name = name.clone();
        }
        if let Some(description) = &self.description {
            dashboard.description = Some(description.clone());
        }
        if let Some(widgets) = &self.widgets {
            dashboard.widgets = widgets.clone();
        }
        if let Some(layout) = &self.layout {
            dashboard.layout = layout.clone();
        }
        dashboard.updated_at = Utc::now();
    }

    /// True when the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.widgets.is_none()
            && self.layout.is_none()
    }
}

/// Snapshot of the repository's sync state, safe to call at any time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Millisecond timestamp of the last completed sync run, 0 if never
    pub last_sync_timestamp: i64,
    /// Number of local entries not yet confirmed by the remote
    pub pending_change_count: usize,
    pub is_online: bool,
    /// Store keys whose last write resolved a conflict
    pub conflict_keys: Vec<String>,
}

/// Runtime configuration for the sync layer
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Key namespace prefix for the durable store
    pub namespace: String,
    /// Interval between reachability probes
    pub probe_interval: Duration,
    /// Timeout on a single reachability probe
    pub probe_timeout: Duration,
    /// Interval between queue drains while online
    pub drain_interval: Duration,
    /// Attempts for a single durable-store write
    pub store_write_retries: u32,
    /// Fixed backoff between store write attempts
    pub store_write_backoff: Duration,
    /// Default retry budget for queued actions
    pub default_max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            namespace: "boardsync".to_string(),
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            drain_interval: Duration::from_secs(10),
            store_write_retries: 3,
            store_write_backoff: Duration::from_secs(1),
            default_max_retries: 3,
        }
    }
}
