//! End-to-end offline sync scenarios
//!
//! Exercises the full stack (store + monitor + repository) against an
//! in-process remote with scriptable connectivity.
//!
//! Run with: cargo test --test offline_sync

use async_trait::async_trait;
use boardsync::net::{ActionHandler, ReachabilityProbe};
use boardsync::remote::RemoteResult;
use boardsync::sync::ResolutionStrategy;
use boardsync::{
    ConnectivityMonitor, CreateDashboardInput, Dashboard, DashboardPatch, DurableStore,
    RemoteApi, RemoteError, StoredEntry, SyncConfig, SyncRepository,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Remote backend with a switchable network and call counters
struct FakeBackend {
    dashboards: Mutex<HashMap<String, Dashboard>>,
    network_down: AtomicBool,
    create_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            dashboards: Mutex::new(HashMap::new()),
            network_down: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    fn set_network_down(&self, down: bool) {
        self.network_down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> RemoteResult<()> {
        if self.network_down.load(Ordering::SeqCst) {
            Err(RemoteError::Network("unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteApi for FakeBackend {
    async fn fetch_dashboard(&self, id: &str) -> RemoteResult<Dashboard> {
        self.check()?;
        self.dashboards
            .lock()
            .get(id)
            .cloned()
            .ok_or(RemoteError::Rejected {
                status: 404,
                message: "not found".to_string(),
            })
    }

    async fn create_dashboard(&self, input: &CreateDashboardInput) -> RemoteResult<Dashboard> {
        self.check()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let dash = Dashboard {
            id: format!("board_{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            name: input.name.clone(),
            description: input.description.clone(),
            widgets: input.widgets.clone(),
            layout: input.layout.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.dashboards.lock().insert(dash.id.clone(), dash.clone());
        Ok(dash)
    }

    async fn update_dashboard(&self, id: &str, patch: &DashboardPatch) -> RemoteResult<Dashboard> {
        self.check()?;
        let mut dashboards = self.dashboards.lock();
        let dash = dashboards.get_mut(id).ok_or(RemoteError::Rejected {
            status: 404,
            message: "not found".to_string(),
        })?;
        patch.apply(dash);
        dash.version += 1;
        Ok(dash.clone())
    }

    async fn delete_dashboard(&self, id: &str) -> RemoteResult<()> {
        self.check()?;
        match self.dashboards.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::Rejected {
                status: 404,
                message: "not found".to_string(),
            }),
        }
    }

    async fn list_dashboards(&self) -> RemoteResult<Vec<Dashboard>> {
        self.check()?;
        let mut list: Vec<Dashboard> = self.dashboards.lock().values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }
}

/// Probe mirroring the backend's network switch
struct BackendProbe(Arc<FakeBackend>);

#[async_trait]
impl ReachabilityProbe for BackendProbe {
    async fn check(&self) -> bool {
        !self.0.network_down.load(Ordering::SeqCst)
    }
}

fn setup() -> (
    Arc<SyncRepository>,
    Arc<FakeBackend>,
    Arc<ConnectivityMonitor>,
    Arc<DurableStore>,
) {
    let store = Arc::new(DurableStore::open_in_memory());
    let monitor = Arc::new(ConnectivityMonitor::new(&SyncConfig::default()));
    let backend = Arc::new(FakeBackend::new());
    let repo = Arc::new(SyncRepository::new(
        Arc::clone(&store),
        Arc::clone(&monitor),
        Arc::clone(&backend) as Arc<dyn RemoteApi>,
    ));
    (repo, backend, monitor, store)
}

fn board_input(name: &str) -> CreateDashboardInput {
    CreateDashboardInput {
        name: name.to_string(),
        description: Some("monthly spending overview".to_string()),
        widgets: vec![],
        layout: json!({"columns": 12}),
    }
}

// ============================================================================
// OFFLINE LIFECYCLE
// ============================================================================

#[tokio::test]
async fn offline_create_survives_reconnect_and_sync() {
    let (repo, backend, monitor, store) = setup();

    // Go dark, create locally
    backend.set_network_down(true);
    monitor.notify_offline();
    let local = repo.create_dashboard(board_input("Spending")).await.unwrap();
    assert!(local.id.starts_with("temp_"));

    // Readable while offline
    let seen = repo.get_dashboard(&local.id).await.unwrap().unwrap();
    assert_eq!(seen.name, "Spending");

    let status = repo.get_sync_status();
    assert!(!status.is_online);
    assert_eq!(status.pending_change_count, 1);

    // Reconnect and sync
    backend.set_network_down(false);
    monitor.notify_online();
    let result = repo.sync_offline_changes().await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.synced_count, 1);

    // Exactly one remote create, temp id fully replaced
    assert_eq!(backend.create_calls.load(Ordering::SeqCst), 1);
    assert!(!store.exists(&format!("dashboard_{}", local.id)));
    let remote_ids: Vec<String> = backend.dashboards.lock().keys().cloned().collect();
    assert_eq!(remote_ids, vec!["board_1".to_string()]);

    let entry: StoredEntry<Dashboard> = store.get("dashboard_board_1").unwrap().unwrap();
    assert!(!entry.is_offline);
    assert_eq!(entry.data.name, "Spending");
}

#[tokio::test]
async fn offline_edits_replay_without_losing_changes() {
    let (repo, backend, monitor, _store) = setup();

    let dash = repo.create_dashboard(board_input("Budget")).await.unwrap();
    assert_eq!(dash.id, "board_1");

    backend.set_network_down(true);
    monitor.notify_offline();

    repo.update_dashboard(
        "board_1",
        DashboardPatch {
            name: Some("Budget 2026".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    backend.set_network_down(false);
    monitor.notify_online();
    let result = repo.sync_offline_changes().await;

    assert!(result.success, "errors: {:?}", result.errors);
    // Plain offline edit against an unchanged server is not a conflict
    assert_eq!(result.conflict_count, 0);
    assert_eq!(
        backend.dashboards.lock().get("board_1").unwrap().name,
        "Budget 2026"
    );
}

#[tokio::test]
async fn queued_actions_drain_on_reconnect() {
    let (repo, backend, monitor, _store) = setup();

    backend.set_network_down(true);
    monitor.notify_offline();
    repo.create_dashboard(board_input("Pending board")).await.unwrap();
    assert_eq!(monitor.pending_count(), 1);

    backend.set_network_down(false);
    monitor.notify_online();
    let report = monitor.drain_now(&*repo).await;

    assert_eq!(report.attempted, 1);
    assert_eq!(report.completed, 1);
    assert!(report.errors.is_empty());
    assert_eq!(monitor.pending_count(), 0);
    assert_eq!(backend.dashboards.lock().len(), 1);
}

// ============================================================================
// CONFLICTS
// ============================================================================

#[tokio::test]
async fn concurrent_edit_resolved_by_merge() {
    let (repo, backend, monitor, store) = setup();

    let dash = repo.create_dashboard(board_input("Shared board")).await.unwrap();

    // Local edit while dark
    backend.set_network_down(true);
    monitor.notify_offline();
    repo.update_dashboard(
        &dash.id,
        DashboardPatch {
            name: Some("Local title".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // Remote side moves on (another device); older timestamp than our edit
    {
        let mut dashboards = backend.dashboards.lock();
        let server = dashboards.get_mut(&dash.id).unwrap();
        server.description = Some("server note".to_string());
        server.version = 2;
        server.updated_at = Utc::now() - chrono::Duration::seconds(30);
    }

    backend.set_network_down(false);
    monitor.notify_online();
    repo.set_resolution_strategy(ResolutionStrategy::Merge);
    let merged = repo.get_dashboard(&dash.id).await.unwrap().unwrap();

    // Local values take precedence for every contested field
    assert_eq!(merged.name, "Local title");
    assert_eq!(merged.description, Some("monthly spending overview".to_string()));

    let entry: StoredEntry<Dashboard> = store
        .get(&format!("dashboard_{}", dash.id))
        .unwrap()
        .unwrap();
    assert_eq!(entry.version, 3);
}

// ============================================================================
// BACKGROUND LOOP
// ============================================================================

#[tokio::test(start_paused = true)]
async fn background_probe_recovers_connectivity_and_drains() {
    let (repo, backend, monitor, _store) = setup();

    backend.set_network_down(true);
    monitor.notify_offline();
    repo.create_dashboard(board_input("Queued board")).await.unwrap();
    assert_eq!(monitor.pending_count(), 1);

    let probe = Arc::new(BackendProbe(Arc::clone(&backend)));
    monitor.start(probe, Arc::clone(&repo) as Arc<dyn ActionHandler>);

    backend.set_network_down(false);

    // Let the spawned task register its interval timers before the
    // paused clock advances
    tokio::task::yield_now().await;

    // Past the probe interval the loop should flip online and drain
    tokio::time::advance(std::time::Duration::from_secs(31)).await;
    for _ in 0..50 {
        tokio::task::yield_now().await;
        if monitor.pending_count() == 0 {
            break;
        }
    }

    assert!(monitor.is_online());
    assert_eq!(monitor.pending_count(), 0);
    assert_eq!(backend.dashboards.lock().len(), 1);

    monitor.destroy().await;
}

// ============================================================================
// DEGRADED MEDIUM
// ============================================================================

#[tokio::test]
async fn degraded_store_keeps_api_total() {
    let store = Arc::new(DurableStore::degraded());
    let monitor = Arc::new(ConnectivityMonitor::new(&SyncConfig::default()));
    let backend = Arc::new(FakeBackend::new());
    let repo = SyncRepository::new(
        store,
        Arc::clone(&monitor),
        Arc::clone(&backend) as Arc<dyn RemoteApi>,
    );

    monitor.notify_offline();

    // Nothing persists, nothing panics, nothing errors
    assert!(repo.get_dashboard("anything").await.unwrap().is_none());
    assert!(repo.get_dashboards().await.unwrap().is_empty());

    let status = repo.get_sync_status();
    assert_eq!(status.last_sync_timestamp, 0);
    assert_eq!(status.pending_change_count, 0);
    assert!(status.conflict_keys.is_empty());
}

// ============================================================================
// CONNECTIVITY SUBSCRIPTIONS
// ============================================================================

#[tokio::test]
async fn listeners_observe_transitions_in_order() {
    let (repo, _backend, monitor, _store) = setup();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = repo.on_network_status_change(Box::new(move |status| {
        sink.lock().push(status.is_online);
    }));

    monitor.notify_offline();
    monitor.notify_online();
    monitor.notify_online(); // same-state, no event
    monitor.notify_offline();
    assert_eq!(*seen.lock(), vec![false, true, false]);

    repo.off_network_status_change(id);
    monitor.notify_online();
    assert_eq!(seen.lock().len(), 3);
}
