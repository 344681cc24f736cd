// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Traits that let the orchestrator drive a platform it knows nothing about.
//!
//! Building the platform-native workload objects for each role, generating
//! credentials, and asking the storage engine about itself all live behind
//! these traits.  The orchestrator only sequences calls into them.

use crate::config::OrchestratorConfig;
use crate::ledger::LedgerIdentityStore;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use cluster_types::spec::DashboardSpec;
use cluster_types::spec::MonitoringSpec;
use cluster_types::spec::NetworkSpec;
use cluster_types::spec::Placement;
use cluster_types::spec::ResourceRequirements;
use cluster_types::spec::StorageSpec;
use cluster_types::ClusterIdentity;
use cluster_types::RoleKind;
use cluster_types::RunningVersionSet;
use cluster_types::SecretRef;
use cluster_types::SoftwareVersion;
use operator_common::process::BoxedProcessRunner;
use operator_common::process::HostProcessRunner;
use slog::info;
use slog::Logger;
use slog_error_chain::SlogInlineError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The cluster resource that owns everything the orchestrator creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRef {
    pub name: String,
    pub namespace: String,
    /// Platform-assigned unique id of the cluster resource, used for owner
    /// references.
    pub uid: String,
}

/// Name of the configuration placeholder created in every cluster namespace.
pub const CONFIG_OVERRIDE_NAME: &str = "rook-config-override";
/// Key within the placeholder that operators may fill in.
pub const CONFIG_OVERRIDE_KEY: &str = "config";

/// A namespace-scoped configuration object that users may edit to override
/// daemon settings.  It is created empty, exactly once, and never rewritten.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigPlaceholder {
    pub name: String,
    pub namespace: String,
    pub owner: ClusterRef,
    pub data: BTreeMap<String, String>,
}

impl ConfigPlaceholder {
    pub fn for_cluster(cluster: &ClusterRef) -> Self {
        ConfigPlaceholder {
            name: CONFIG_OVERRIDE_NAME.to_string(),
            namespace: cluster.namespace.clone(),
            owner: cluster.clone(),
            data: BTreeMap::from([(
                CONFIG_OVERRIDE_KEY.to_string(),
                String::new(),
            )]),
        }
    }
}

/// Role-specific slice of the cluster spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleFeatures {
    Mon { allow_multiple_per_node: bool },
    Mgr {
        dashboard: DashboardSpec,
        monitoring: MonitoringSpec,
        modules: Vec<String>,
    },
    Osd { storage: StorageSpec },
    RbdMirror,
}

/// Everything a [`WorkloadManager`] needs to create or update the workloads
/// of one daemon role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleSpec {
    pub kind: RoleKind,
    /// Base name of the role's workloads, e.g. `rook-ceph-mgr`.
    pub name: String,
    pub namespace: String,
    pub owner: ClusterRef,
    /// Number of daemons; `None` if the role sizes itself (storage nodes).
    pub replicas: Option<u32>,
    /// Image the daemons run.
    pub image: String,
    /// Image of the operator itself, for init containers and helpers.
    pub operator_image: String,
    pub identity: ClusterIdentity,
    pub placement: Placement,
    pub resources: ResourceRequirements,
    pub annotations: BTreeMap<String, String>,
    pub network: NetworkSpec,
    pub data_dir_host_path: String,
    /// Set when this pass moves the cluster to a new version.
    pub is_upgrade: bool,
    /// During an upgrade, the oldest version this role's daemons are running.
    pub current_version: Option<SoftwareVersion>,
    pub features: RoleFeatures,
}

/// Where a role's workloads stand after a create-or-update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleReadiness {
    Ready,
    Converging { detail: String },
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum WorkloadError {
    /// The platform refused to create an object that already exists.  Every
    /// caller treats this as success.
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("platform request failed")]
    Platform(#[source] anyhow::Error),
}

impl WorkloadError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, WorkloadError::AlreadyExists { .. })
    }
}

/// Creates and updates the platform-native objects backing each role.
///
/// Every method must be idempotent: calling it against objects that are
/// already correctly configured is a no-op or a converging update.
#[async_trait]
pub trait WorkloadManager: Send + Sync {
    async fn ensure_config_placeholder(
        &self,
        placeholder: &ConfigPlaceholder,
    ) -> Result<(), WorkloadError>;

    /// Create the cluster's admin secret if it does not exist, returning a
    /// reference to it either way.
    async fn ensure_admin_secret(
        &self,
        cluster: &ClusterRef,
    ) -> Result<SecretRef, WorkloadError>;

    async fn create_or_update_role(
        &self,
        role: &RoleSpec,
    ) -> Result<RoleReadiness, WorkloadError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterHealth {
    Healthy,
    Unhealthy { summary: String },
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum StatusError {
    #[error("storage engine did not answer")]
    Unreachable(#[source] anyhow::Error),
    #[error("could not interpret storage engine response")]
    BadResponse(#[source] anyhow::Error),
}

/// Read-only queries against the live storage cluster.
#[async_trait]
pub trait ClusterStatusReader: Send + Sync {
    async fn health(&self) -> Result<ClusterHealth, StatusError>;

    async fn running_versions(&self) -> Result<RunningVersionSet, StatusError>;
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum IdentityStoreError {
    #[error("failed to access identity record {path:?}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to parse identity record {path:?}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: serde_json::Error,
    },
    #[error("failed to serialize identity record")]
    Serialize(#[source] serde_json::Error),
    #[error("identity store failed")]
    Other(#[source] anyhow::Error),
}

/// Persists the [`ClusterIdentity`] record across operator restarts.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn load(&self) -> Result<Option<ClusterIdentity>, IdentityStoreError>;

    async fn save(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<(), IdentityStoreError>;
}

/// The collaborators one cluster's orchestrator calls into.
#[derive(Clone)]
pub struct Facilities {
    pub workloads: Arc<dyn WorkloadManager>,
    pub status: Arc<dyn ClusterStatusReader>,
    pub identity_store: Arc<dyn IdentityStore>,
    pub process_runner: BoxedProcessRunner,
}

impl Facilities {
    /// Collaborators for an operator process running on a real host.
    ///
    /// Version probes go through the configured container runtime.  The
    /// identity is kept in the configured ledger file if there is one, and in
    /// `platform_store` otherwise.
    pub fn for_host(
        log: &Logger,
        config: &OrchestratorConfig,
        workloads: Arc<dyn WorkloadManager>,
        status: Arc<dyn ClusterStatusReader>,
        platform_store: Arc<dyn IdentityStore>,
    ) -> Facilities {
        let process_runner = Arc::new(HostProcessRunner::new(
            log,
            config.version_probe.container_runtime.clone(),
        ))
        .as_runner();
        let identity_store: Arc<dyn IdentityStore> =
            match &config.identity_ledger {
                Some(path) => {
                    info!(
                        log,
                        "keeping cluster identity in a local ledger";
                        "path" => path.as_str(),
                    );
                    Arc::new(LedgerIdentityStore::new(log, path.clone()))
                }
                None => platform_store,
            };
        Facilities { workloads, status, identity_store, process_runner }
    }
}
