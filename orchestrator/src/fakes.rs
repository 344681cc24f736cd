// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory collaborators for tests

use crate::facilities::ClusterHealth;
use crate::facilities::ClusterRef;
use crate::facilities::ClusterStatusReader;
use crate::facilities::ConfigPlaceholder;
use crate::facilities::IdentityStore;
use crate::facilities::IdentityStoreError;
use crate::facilities::RoleReadiness;
use crate::facilities::RoleSpec;
use crate::facilities::StatusError;
use crate::facilities::WorkloadError;
use crate::facilities::WorkloadManager;
use crate::notifier::ChildController;
use anyhow::anyhow;
use async_trait::async_trait;
use cluster_types::ClusterIdentity;
use cluster_types::ClusterSpec;
use cluster_types::RoleKind;
use cluster_types::RunningVersionSet;
use cluster_types::SecretRef;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// Lets a test pause the next `create_or_update_role()` call for one role.
pub struct RoleHold {
    /// Receives the role spec once the call has started.
    pub entered: mpsc::UnboundedReceiver<RoleSpec>,
    /// Notify once to let the call finish.
    pub release: Arc<Notify>,
}

struct PendingHold {
    entered: mpsc::UnboundedSender<RoleSpec>,
    release: Arc<Notify>,
}

#[derive(Default)]
struct WorkloadState {
    placeholders: Vec<ConfigPlaceholder>,
    placeholder_exists: bool,
    admin_secret_calls: usize,
    applied: Vec<RoleSpec>,
    failures: BTreeMap<RoleKind, String>,
    already_exists: BTreeSet<RoleKind>,
    not_ready: BTreeMap<RoleKind, u32>,
    holds: BTreeMap<RoleKind, PendingHold>,
}

/// Accepts every request, recording it, unless told otherwise.
#[derive(Default)]
pub struct FakeWorkloadManager {
    state: Mutex<WorkloadState>,
}

impl FakeWorkloadManager {
    pub fn new() -> Arc<FakeWorkloadManager> {
        Arc::new(Self::default())
    }

    /// Fail every request for `role`.
    pub fn fail_role(&self, role: RoleKind, message: &str) {
        self.state.lock().unwrap().failures.insert(role, message.to_string());
    }

    pub fn clear_failure(&self, role: RoleKind) {
        self.state.lock().unwrap().failures.remove(&role);
    }

    /// Report `role` as still converging for the next `polls` requests.
    pub fn not_ready_polls(&self, role: RoleKind, polls: u32) {
        self.state.lock().unwrap().not_ready.insert(role, polls);
    }

    /// Answer requests for `role` as though its workloads were created by
    /// someone else.
    pub fn already_exists(&self, role: RoleKind) {
        self.state.lock().unwrap().already_exists.insert(role);
    }

    pub fn placeholder_already_exists(&self) {
        self.state.lock().unwrap().placeholder_exists = true;
    }

    /// Pause the next request for `role` until the returned hold is
    /// released.
    pub fn hold_role(&self, role: RoleKind) -> RoleHold {
        let (tx, rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        self.state.lock().unwrap().holds.insert(
            role,
            PendingHold { entered: tx, release: release.clone() },
        );
        RoleHold { entered: rx, release }
    }

    pub fn placeholders(&self) -> Vec<ConfigPlaceholder> {
        self.state.lock().unwrap().placeholders.clone()
    }

    pub fn admin_secret_calls(&self) -> usize {
        self.state.lock().unwrap().admin_secret_calls
    }

    /// Every role request received, in order.
    pub fn applied(&self) -> Vec<RoleSpec> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn applied_kinds(&self) -> Vec<RoleKind> {
        self.state.lock().unwrap().applied.iter().map(|r| r.kind).collect()
    }
}

#[async_trait]
impl WorkloadManager for FakeWorkloadManager {
    async fn ensure_config_placeholder(
        &self,
        placeholder: &ConfigPlaceholder,
    ) -> Result<(), WorkloadError> {
        let mut state = self.state.lock().unwrap();
        state.placeholders.push(placeholder.clone());
        if state.placeholder_exists {
            return Err(WorkloadError::AlreadyExists {
                kind: "configmap",
                name: placeholder.name.clone(),
            });
        }
        state.placeholder_exists = true;
        Ok(())
    }

    async fn ensure_admin_secret(
        &self,
        cluster: &ClusterRef,
    ) -> Result<SecretRef, WorkloadError> {
        self.state.lock().unwrap().admin_secret_calls += 1;
        Ok(SecretRef {
            name: format!("{}-mon", cluster.namespace),
            key: "admin-secret".to_string(),
        })
    }

    async fn create_or_update_role(
        &self,
        role: &RoleSpec,
    ) -> Result<RoleReadiness, WorkloadError> {
        let hold = {
            let mut state = self.state.lock().unwrap();
            state.applied.push(role.clone());
            if let Some(message) = state.failures.get(&role.kind) {
                return Err(WorkloadError::Platform(anyhow!("{message}")));
            }
            if state.already_exists.contains(&role.kind) {
                return Err(WorkloadError::AlreadyExists {
                    kind: "deployment",
                    name: role.name.clone(),
                });
            }
            if let Some(polls) = state.not_ready.get_mut(&role.kind) {
                if *polls > 0 {
                    *polls -= 1;
                    return Ok(RoleReadiness::Converging {
                        detail: format!("{} replicas updating", role.name),
                    });
                }
            }
            state.holds.remove(&role.kind)
        };

        if let Some(hold) = hold {
            // The receiver may have been dropped by a test that only cares
            // about the pause.
            let _ = hold.entered.send(role.clone());
            hold.release.notified().await;
        }
        Ok(RoleReadiness::Ready)
    }
}

/// Answers with whatever health and versions it was last given.
pub struct FakeStatusReader {
    health: Mutex<Result<ClusterHealth, String>>,
    versions: Mutex<Result<RunningVersionSet, String>>,
    health_calls: AtomicUsize,
    version_calls: AtomicUsize,
}

impl FakeStatusReader {
    /// A healthy cluster reporting no versions.
    pub fn new() -> Arc<FakeStatusReader> {
        Arc::new(FakeStatusReader {
            health: Mutex::new(Ok(ClusterHealth::Healthy)),
            versions: Mutex::new(Ok(RunningVersionSet::default())),
            health_calls: AtomicUsize::new(0),
            version_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_healthy(&self) {
        *self.health.lock().unwrap() = Ok(ClusterHealth::Healthy);
    }

    pub fn set_unhealthy(&self, summary: &str) {
        *self.health.lock().unwrap() =
            Ok(ClusterHealth::Unhealthy { summary: summary.to_string() });
    }

    pub fn set_health_error(&self, message: &str) {
        *self.health.lock().unwrap() = Err(message.to_string());
    }

    pub fn set_versions(&self, versions: RunningVersionSet) {
        *self.versions.lock().unwrap() = Ok(versions);
    }

    /// Report every daemon of every role as running `version`, given as the
    /// engine prints it.
    pub fn set_uniform_version(&self, version: &str) {
        let reported = format!("ceph version {version} (0123abcd) stable");
        let one = BTreeMap::from([(reported, 1)]);
        self.set_versions(RunningVersionSet {
            mon: one.clone(),
            mgr: one.clone(),
            osd: one.clone(),
            rbd_mirror: one.clone(),
            overall: one,
        });
    }

    pub fn set_versions_error(&self, message: &str) {
        *self.versions.lock().unwrap() = Err(message.to_string());
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterStatusReader for FakeStatusReader {
    async fn health(&self) -> Result<ClusterHealth, StatusError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.health
            .lock()
            .unwrap()
            .clone()
            .map_err(|message| StatusError::Unreachable(anyhow!("{message}")))
    }

    async fn running_versions(&self) -> Result<RunningVersionSet, StatusError> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        self.versions
            .lock()
            .unwrap()
            .clone()
            .map_err(|message| StatusError::Unreachable(anyhow!("{message}")))
    }
}

/// Keeps the identity in memory.
#[derive(Default)]
pub struct FakeIdentityStore {
    record: Mutex<Option<ClusterIdentity>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl FakeIdentityStore {
    pub fn new() -> Arc<FakeIdentityStore> {
        Arc::new(Self::default())
    }

    pub fn with_identity(identity: ClusterIdentity) -> Arc<FakeIdentityStore> {
        let store = Self::default();
        *store.record.lock().unwrap() = Some(identity);
        Arc::new(store)
    }

    pub fn current(&self) -> Option<ClusterIdentity> {
        self.record.lock().unwrap().clone()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityStore for FakeIdentityStore {
    async fn load(&self) -> Result<Option<ClusterIdentity>, IdentityStoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(IdentityStoreError::Other(anyhow!(
                "identity store unavailable"
            )));
        }
        Ok(self.current())
    }

    async fn save(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<(), IdentityStoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(IdentityStoreError::Other(anyhow!(
                "identity store unavailable"
            )));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.record.lock().unwrap() = Some(identity.clone());
        Ok(())
    }
}

/// A child controller that remembers every notification.
#[derive(Default)]
pub struct RecordingChild {
    notifications: Mutex<Vec<(ClusterSpec, ClusterIdentity, bool)>>,
    fail_with: Option<String>,
}

impl RecordingChild {
    pub fn new() -> Arc<RecordingChild> {
        Arc::new(Self::default())
    }

    /// A child that records each notification and then fails.
    pub fn failing(message: &str) -> Arc<RecordingChild> {
        Arc::new(RecordingChild {
            notifications: Mutex::new(Vec::new()),
            fail_with: Some(message.to_string()),
        })
    }

    pub fn notifications(&self) -> Vec<(ClusterSpec, ClusterIdentity, bool)> {
        self.notifications.lock().unwrap().clone()
    }
}

impl ChildController for RecordingChild {
    fn parent_cluster_changed(
        &self,
        spec: &ClusterSpec,
        identity: &ClusterIdentity,
        is_upgrade: bool,
    ) -> anyhow::Result<()> {
        self.notifications.lock().unwrap().push((
            spec.clone(),
            identity.clone(),
            is_upgrade,
        ));
        match &self.fail_with {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}
