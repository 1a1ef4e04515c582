//! Synchronizing dashboard repository
//!
//! Domain-level CRUD facade built on the durable store and the
//! connectivity monitor. Reads prefer remote-when-online and fall back to
//! the local copy; writes are local-first and replayed against the remote
//! through the monitor's action queue. Expected failure modes (offline,
//! transient network errors, conflicts) are absorbed into typed results;
//! only programming errors propagate.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::conflict::{self, ResolutionStrategy};
use super::SyncResult;
use crate::error::{BoardsyncError, Result};
use crate::net::{ActionHandler, ActionKind, ConnectivityMonitor, ListenerId, NetworkStatus, QueuedAction};
use crate::remote::RemoteApi;
use crate::store::{DurableStore, ResolutionTag, StoredEntry, WriteOptions};
use crate::types::{
    now_millis, CreateDashboardInput, Dashboard, DashboardPatch, SyncStatus, TEMP_ID_PREFIX,
};

/// Key holding the ordered dashboard id list
const IDS_KEY: &str = "dashboard_ids";
/// Key holding the last successful sync timestamp
const LAST_SYNC_KEY: &str = "last_sync";
/// Prefix for per-dashboard entry keys
const ENTRY_PREFIX: &str = "dashboard_";

fn entry_key(id: &str) -> String {
    format!("{}{}", ENTRY_PREFIX, id)
}

fn temp_id() -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10000);
    format!("{}{}_{}", TEMP_ID_PREFIX, now_millis(), suffix)
}

/// Rebuild a full patch from a stored dashboard, for replaying the
/// equivalent remote update.
fn full_patch(dash: &Dashboard) -> DashboardPatch {
    DashboardPatch {
        name: Some(dash.name.clone()),
        description: dash.description.clone(),
        widgets: Some(dash.widgets.clone()),
        layout: Some(dash.layout.clone()),
    }
}

/// Offline-first CRUD facade over dashboards.
///
/// Constructed once at startup and shared by reference; also serves as
/// the [`ActionHandler`] the connectivity monitor drains against.
pub struct SyncRepository {
    store: Arc<DurableStore>,
    monitor: Arc<ConnectivityMonitor>,
    remote: Arc<dyn RemoteApi>,
    strategy: Mutex<ResolutionStrategy>,
    sync_running: AtomicBool,
}

impl SyncRepository {
    pub fn new(
        store: Arc<DurableStore>,
        monitor: Arc<ConnectivityMonitor>,
        remote: Arc<dyn RemoteApi>,
    ) -> Self {
        Self {
            store,
            monitor,
            remote,
            strategy: Mutex::new(ResolutionStrategy::default()),
            sync_running: AtomicBool::new(false),
        }
    }

    /// Strategy applied when an online read detects divergence
    pub fn set_resolution_strategy(&self, strategy: ResolutionStrategy) {
        *self.strategy.lock() = strategy;
    }

    pub fn resolution_strategy(&self) -> ResolutionStrategy {
        *self.strategy.lock()
    }

    // ------------------------------------------------------------------
    // Id list bookkeeping
    // ------------------------------------------------------------------

    fn read_ids(&self) -> Vec<String> {
        self.store
            .get::<Vec<String>>(IDS_KEY)
            .ok()
            .flatten()
            .map(|entry| entry.data)
            .unwrap_or_default()
    }

    async fn write_ids(&self, ids: &Vec<String>) -> Result<()> {
        self.store.put(IDS_KEY, ids, WriteOptions::default()).await
    }

    async fn add_id(&self, id: &str) -> Result<()> {
        let mut ids = self.read_ids();
        if !ids.iter().any(|i| i == id) {
            ids.push(id.to_string());
            self.write_ids(&ids).await?;
        }
        Ok(())
    }

    async fn remove_id(&self, id: &str) -> Result<()> {
        let mut ids = self.read_ids();
        let before = ids.len();
        ids.retain(|i| i != id);
        if ids.len() < before {
            self.write_ids(&ids).await?;
        }
        Ok(())
    }

    /// Replace `from` with `to` everywhere in the id list, deduplicating
    async fn replace_id(&self, from: &str, to: &str) -> Result<()> {
        let mut ids = self.read_ids();
        ids.retain(|i| i != from);
        if !ids.iter().any(|i| i == to) {
            ids.push(to.to_string());
        }
        self.write_ids(&ids).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn local_dashboard(&self, id: &str) -> Option<Dashboard> {
        self.store
            .get::<Dashboard>(&entry_key(id))
            .ok()
            .flatten()
            .map(|entry| entry.data)
    }

    /// Read a dashboard: remote-when-online with conflict reconciliation,
    /// local fallback otherwise. Never errors for connectivity problems.
    pub async fn get_dashboard(&self, id: &str) -> Result<Option<Dashboard>> {
        if !self.monitor.is_online() {
            return Ok(self.local_dashboard(id));
        }

        match self.remote.fetch_dashboard(id).await {
            Ok(server) => {
                let reconciled = self.reconcile(server).await?;
                Ok(Some(reconciled))
            }
            Err(e) => {
                // Graceful degradation: a failed fetch reads as the local
                // copy, not as an error
                tracing::debug!("Remote fetch of {} failed, using local: {}", id, e);
                Ok(self.local_dashboard(id))
            }
        }
    }

    /// List dashboards, reconciling each remote copy into the store when
    /// online. Offline creates (temp ids) are always retained.
    pub async fn get_dashboards(&self) -> Result<Vec<Dashboard>> {
        if self.monitor.is_online() {
            match self.remote.list_dashboards().await {
                Ok(list) => {
                    let previous = self.read_ids();
                    let mut result = Vec::with_capacity(list.len());
                    let mut ids = Vec::with_capacity(list.len());
                    for server in list {
                        ids.push(server.id.clone());
                        result.push(self.reconcile(server).await?);
                    }
                    // Keep unsynced local creates at the end of the list
                    for id in self.read_ids() {
                        if id.starts_with(TEMP_ID_PREFIX) {
                            ids.push(id.clone());
                            if let Some(dash) = self.local_dashboard(&id) {
                                result.push(dash);
                            }
                        }
                    }
                    // Entries the server dropped are gone for good; their
                    // cached copies would otherwise linger in every scan
                    for id in &previous {
                        if !id.starts_with(TEMP_ID_PREFIX) && !ids.iter().any(|i| i == id) {
                            self.store.remove(&entry_key(id))?;
                        }
                    }
                    self.write_ids(&ids).await?;
                    return Ok(result);
                }
                Err(e) => {
                    tracing::debug!("Remote list failed, using local: {}", e);
                }
            }
        }

        Ok(self
            .read_ids()
            .iter()
            .filter_map(|id| self.local_dashboard(id))
            .collect())
    }

    /// Fold a server copy into the local store, resolving divergence per
    /// the configured strategy. Returns the dashboard the caller sees.
    async fn reconcile(&self, server: Dashboard) -> Result<Dashboard> {
        let key = entry_key(&server.id);
        let local: Option<StoredEntry<Dashboard>> = self.store.get(&key)?;

        let Some(local) = local else {
            // First sight of this dashboard: server copy is local truth
            self.store
                .put(
                    &key,
                    &server,
                    WriteOptions {
                        version: Some(server.version),
                        ..Default::default()
                    },
                )
                .await?;
            self.add_id(&server.id).await?;
            return Ok(server);
        };

        let info = conflict::detect(
            local.version,
            local.last_modified,
            server.version,
            server.updated_at.timestamp_millis(),
        );

        if !info.has_conflict {
            // A pending offline edit with no divergence is not stale: the
            // local copy stays authoritative until its replay pushes it
            if local.is_offline {
                self.add_id(&server.id).await?;
                return Ok(local.data);
            }
            self.store
                .put(
                    &key,
                    &server,
                    WriteOptions {
                        version: Some(server.version),
                        ..Default::default()
                    },
                )
                .await?;
            self.add_id(&server.id).await?;
            return Ok(server);
        }

        let strategy = self.resolution_strategy();
        let resolved =
            conflict::resolve(strategy, &local.data, local.version, &server, server.version)?;
        tracing::info!(
            "Conflict on {} resolved via {:?} (local v{}, server v{})",
            server.id,
            strategy,
            info.local_version,
            info.server_version
        );

        // Local and merged outcomes still need a push; only adopting the
        // server copy leaves nothing pending
        let still_dirty = resolved.tag != ResolutionTag::Server;
        self.store
            .put(
                &key,
                &resolved.dashboard,
                WriteOptions {
                    version: Some(resolved.version),
                    offline: still_dirty,
                    resolution: Some(resolved.tag),
                },
            )
            .await?;
        self.add_id(&server.id).await?;
        Ok(resolved.dashboard)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create a dashboard: local-first with a temp id, pushed immediately
    /// when online, queued for replay otherwise.
    pub async fn create_dashboard(&self, input: CreateDashboardInput) -> Result<Dashboard> {
        let now = chrono::Utc::now();
        let local = Dashboard {
            id: temp_id(),
            name: input.name.clone(),
            description: input.description.clone(),
            widgets: input.widgets.clone(),
            layout: input.layout.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.store
            .put(
                &entry_key(&local.id),
                &local,
                WriteOptions {
                    version: Some(local.version),
                    offline: true,
                    ..Default::default()
                },
            )
            .await?;
        self.add_id(&local.id).await?;

        if !self.monitor.is_online() {
            self.enqueue_create(&local.id);
            return Ok(local);
        }

        match self.remote.create_dashboard(&input).await {
            Ok(server) => {
                let confirmed = self.finalize_create(&local.id, server).await?;
                Ok(confirmed)
            }
            Err(e) if e.is_network() => {
                self.enqueue_create(&local.id);
                Ok(local)
            }
            Err(e) => {
                // Validation rejection is final: undo the local write and
                // surface the error
                self.store.remove(&entry_key(&local.id))?;
                self.remove_id(&local.id).await?;
                Err(e.into())
            }
        }
    }

    /// Apply a patch: local-first, remote push when reachable.
    pub async fn update_dashboard(
        &self,
        id: &str,
        patch: DashboardPatch,
    ) -> Result<Option<Dashboard>> {
        let Some(mut dash) = self.local_dashboard(id) else {
            // Unknown locally; online we can still patch a remote-only
            // dashboard by fetching it first
            if !self.monitor.is_online() {
                return Ok(None);
            }
            match self.remote.fetch_dashboard(id).await {
                Ok(server) => {
                    self.reconcile(server).await?;
                }
                Err(_) => return Ok(None),
            }
            return Box::pin(self.update_dashboard(id, patch)).await;
        };

        patch.apply(&mut dash);
        self.store
            .put(
                &entry_key(id),
                &dash,
                WriteOptions {
                    version: Some(dash.version),
                    offline: true,
                    ..Default::default()
                },
            )
            .await?;

        // A still-temp dashboard has no server copy to patch; the queued
        // create replays the current local state
        if dash.has_temp_id() {
            return Ok(Some(dash));
        }

        if !self.monitor.is_online() {
            self.enqueue_update(id);
            return Ok(Some(dash));
        }

        match self.remote.update_dashboard(id, &patch).await {
            Ok(server) => {
                self.store
                    .put(
                        &entry_key(id),
                        &server,
                        WriteOptions {
                            version: Some(server.version),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(Some(server))
            }
            Err(e) if e.is_network() => {
                self.enqueue_update(id);
                Ok(Some(dash))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a dashboard: optimistic local removal, remote delete queued
    /// when unreachable. Returns false when the id was unknown.
    pub async fn delete_dashboard(&self, id: &str) -> Result<bool> {
        let existed = self.store.exists(&entry_key(id));
        self.store.remove(&entry_key(id))?;
        self.remove_id(id).await?;

        if id.starts_with(TEMP_ID_PREFIX) {
            // Never reached the server; drop any pending create replay
            for action in self.monitor.pending_actions() {
                if action.payload.get("temp_id").and_then(|v| v.as_str()) == Some(id) {
                    self.monitor.dequeue(action.id);
                }
            }
            return Ok(existed);
        }

        if !self.monitor.is_online() {
            self.enqueue_delete(id);
            return Ok(existed);
        }

        match self.remote.delete_dashboard(id).await {
            Ok(()) => Ok(existed),
            Err(e) if e.is_network() => {
                self.enqueue_delete(id);
                Ok(existed)
            }
            Err(e) => {
                // Local deletion stands either way; a rejection usually
                // means the server already forgot the dashboard
                tracing::warn!("Remote delete of {} rejected: {}", id, e);
                Ok(existed)
            }
        }
    }

    fn enqueue_create(&self, temp_id: &str) {
        self.monitor
            .enqueue(ActionKind::Create, json!({ "temp_id": temp_id }));
    }

    fn enqueue_update(&self, id: &str) {
        self.monitor.enqueue(ActionKind::Update, json!({ "id": id }));
    }

    fn enqueue_delete(&self, id: &str) {
        self.monitor.enqueue(ActionKind::Delete, json!({ "id": id }));
    }

    /// Promote a temp entry to its server identity: rewrite the entry key
    /// and the id list, clear the offline flag.
    async fn finalize_create(&self, temp: &str, server: Dashboard) -> Result<Dashboard> {
        // Rename first so the entry keeps its original created_at
        self.store.rename(&entry_key(temp), &entry_key(&server.id))?;
        self.store
            .put(
                &entry_key(&server.id),
                &server,
                WriteOptions {
                    version: Some(server.version),
                    ..Default::default()
                },
            )
            .await?;
        self.replace_id(temp, &server.id).await?;
        tracing::debug!("Temp dashboard {} confirmed as {}", temp, server.id);
        Ok(server)
    }

    // ------------------------------------------------------------------
    // Bulk sync
    // ------------------------------------------------------------------

    /// Replay every offline-dirty entry against the remote.
    ///
    /// Refuses to start while another run is in flight or while offline;
    /// both refusals come back as unsuccessful results, not errors. Item
    /// failures accumulate without aborting the batch.
    pub async fn sync_offline_changes(&self) -> SyncResult {
        if self
            .sync_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return SyncResult::refused("Sync already in progress");
        }

        let result = if self.monitor.is_online() {
            self.run_sync().await
        } else {
            SyncResult::refused("Cannot sync while offline")
        };

        self.sync_running.store(false, Ordering::Release);
        result
    }

    async fn run_sync(&self) -> SyncResult {
        let mut result = SyncResult::default();

        for key in self.store.keys(Some(ENTRY_PREFIX)) {
            if key == IDS_KEY {
                continue;
            }
            let entry: StoredEntry<Dashboard> = match self.store.get(&key) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    result.errors.push(format!("{}: {}", key, e));
                    continue;
                }
            };
            if !entry.is_offline {
                continue;
            }

            let id = entry.data.id.clone();
            let outcome = if entry.data.has_temp_id() {
                self.push_create(&id).await
            } else {
                self.push_update(&id, &entry, &mut result.conflict_count).await
            };

            match outcome {
                Ok(()) => result.synced_count += 1,
                Err(e) => result.errors.push(format!("{}: {}", id, e)),
            }
        }

        // Only a fully clean run moves the last-successful-sync marker
        if result.errors.is_empty() {
            if let Err(e) = self
                .store
                .put(LAST_SYNC_KEY, &now_millis(), WriteOptions::default())
                .await
            {
                result.errors.push(format!("last_sync: {}", e));
            }
        }

        result.success = result.errors.is_empty();
        tracing::info!(
            "Sync run finished: {} synced, {} conflicts, {} errors",
            result.synced_count,
            result.conflict_count,
            result.errors.len()
        );
        result
    }

    /// Replay a queued/offline create from the current local state
    async fn push_create(&self, temp: &str) -> Result<()> {
        let Some(dash) = self.local_dashboard(temp) else {
            // Deleted locally before it ever synced; nothing to replay
            return Ok(());
        };
        let input = CreateDashboardInput {
            name: dash.name.clone(),
            description: dash.description.clone(),
            widgets: dash.widgets.clone(),
            layout: dash.layout.clone(),
        };
        let server = self.remote.create_dashboard(&input).await?;
        self.finalize_create(temp, server).await?;
        Ok(())
    }

    /// Replay an offline update, reconciling against the server copy first
    async fn push_update(
        &self,
        id: &str,
        local: &StoredEntry<Dashboard>,
        conflict_count: &mut usize,
    ) -> Result<()> {
        let key = entry_key(id);

        let (to_push, version, tag) = match self.remote.fetch_dashboard(id).await {
            Ok(server) => {
                let info = conflict::detect(
                    local.version,
                    local.last_modified,
                    server.version,
                    server.updated_at.timestamp_millis(),
                );
                if info.has_conflict {
                    *conflict_count += 1;
                    let strategy = self.resolution_strategy();
                    let resolved = conflict::resolve(
                        strategy,
                        &local.data,
                        local.version,
                        &server,
                        server.version,
                    )?;
                    if resolved.tag == ResolutionTag::Server {
                        // Server wins: adopt and stop, nothing to push
                        self.store
                            .put(
                                &key,
                                &resolved.dashboard,
                                WriteOptions {
                                    version: Some(resolved.version),
                                    resolution: Some(resolved.tag),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        return Ok(());
                    }
                    (resolved.dashboard, resolved.version, Some(resolved.tag))
                } else {
                    (local.data.clone(), local.version, None)
                }
            }
            Err(e) if e.is_network() => return Err(e.into()),
            Err(_) => {
                // Fetch rejected (e.g. unknown id); push our copy anyway
                (local.data.clone(), local.version, None)
            }
        };

        let patch = full_patch(&to_push);
        let server = self.remote.update_dashboard(id, &patch).await?;
        self.store
            .put(
                &key,
                &server,
                WriteOptions {
                    version: Some(server.version.max(version)),
                    resolution: tag,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Status & subscriptions
    // ------------------------------------------------------------------

    /// Snapshot of sync state; total even when the store is degraded.
    pub fn get_sync_status(&self) -> SyncStatus {
        let last_sync = self
            .store
            .get::<i64>(LAST_SYNC_KEY)
            .ok()
            .flatten()
            .map(|entry| entry.data)
            .unwrap_or(0);

        let mut pending = 0;
        let mut conflict_keys = Vec::new();
        for key in self.store.keys(Some(ENTRY_PREFIX)) {
            if key == IDS_KEY {
                continue;
            }
            if let Ok(Some(entry)) = self.store.get::<Dashboard>(&key) {
                if entry.is_offline {
                    pending += 1;
                }
                if entry.resolution.is_some() {
                    conflict_keys.push(key);
                }
            }
        }

        SyncStatus {
            last_sync_timestamp: last_sync,
            pending_change_count: pending,
            is_online: self.monitor.is_online(),
            conflict_keys,
        }
    }

    /// Subscribe a UI connectivity indicator
    pub fn on_network_status_change(
        &self,
        listener: Box<dyn Fn(&NetworkStatus) + Send + Sync>,
    ) -> ListenerId {
        self.monitor.subscribe(listener)
    }

    pub fn off_network_status_change(&self, id: ListenerId) -> bool {
        self.monitor.unsubscribe(id)
    }
}

/// Replays queued actions when the monitor drains.
#[async_trait]
impl ActionHandler for SyncRepository {
    async fn execute(&self, action: &QueuedAction) -> Result<()> {
        match action.kind {
            ActionKind::Create => {
                let temp = action
                    .payload
                    .get("temp_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        BoardsyncError::Internal("Create action without temp_id".to_string())
                    })?;
                self.push_create(temp).await
            }
            ActionKind::Update => {
                let id = action
                    .payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        BoardsyncError::Internal("Update action without id".to_string())
                    })?;
                let Some(entry) = self.store.get::<Dashboard>(&entry_key(id))? else {
                    return Ok(());
                };
                if !entry.is_offline || entry.data.has_temp_id() {
                    return Ok(());
                }
                let mut conflicts = 0;
                self.push_update(id, &entry, &mut conflicts).await
            }
            ActionKind::Delete => {
                let id = action
                    .payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        BoardsyncError::Internal("Delete action without id".to_string())
                    })?;
                match self.remote.delete_dashboard(id).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_network() => Err(e.into()),
                    Err(e) => {
                        // Already gone server-side; the intent is satisfied
                        tracing::debug!("Queued delete of {} rejected: {}", id, e);
                        Ok(())
                    }
                }
            }
            // Presence channel subscriptions are out of scope here; the
            // queue carries them for the collaboration layer, which treats
            // replay as best-effort
            ActionKind::Subscribe | ActionKind::Unsubscribe => Ok(()),
        }
    }
}
