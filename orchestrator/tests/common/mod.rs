// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A cluster orchestrator wired to in-memory collaborators

use cluster_orchestrator::config::OrchestratorConfig;
use cluster_orchestrator::config::UpgradeConfig;
use cluster_orchestrator::config::VersionProbeConfig;
use cluster_orchestrator::facilities::ClusterRef;
use cluster_orchestrator::facilities::IdentityStore;
use cluster_orchestrator::fakes::FakeIdentityStore;
use cluster_orchestrator::fakes::FakeStatusReader;
use cluster_orchestrator::fakes::FakeWorkloadManager;
use cluster_orchestrator::fakes::RecordingChild;
use cluster_orchestrator::ClusterOrchestrator;
use cluster_orchestrator::Facilities;
use cluster_types::ClusterIdentity;
use cluster_types::ClusterSpec;
use cluster_types::SecretRef;
use cluster_types::SoftwareVersion;
use operator_common::process::FakeProcessRunner;
use operator_common::process::ProcessOutput;
use operator_test_utils::dev::test_component_log;
use operator_test_utils::dev::LogContext;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const NAMESPACE: &str = "rook-ceph";

pub fn cluster_ref() -> ClusterRef {
    ClusterRef {
        name: "my-cluster".to_string(),
        namespace: NAMESPACE.to_string(),
        uid: "5c1c5b8d-2b8e-4c56-9a51-0c3a8e1b7f42".to_string(),
    }
}

pub fn image(version: &str) -> String {
    format!("quay.io/ceph/ceph:v{version}")
}

/// A spec running `version` with one mirroring agent, so that every role is
/// exercised.
pub fn spec(version: &str) -> ClusterSpec {
    let mut spec = ClusterSpec::default();
    spec.software.image = image(version);
    spec.data_dir_host_path = "/var/lib/rook".to_string();
    spec.rbd_mirroring.workers = 1;
    spec
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        operator_image: "rook/ceph:v1.0.0".to_string(),
        version_probe: VersionProbeConfig::default(),
        role_ready_timeout: Duration::from_secs(5),
        identity_ledger: None,
        upgrade: UpgradeConfig::default(),
    }
}

pub fn version(version: &str) -> SoftwareVersion {
    version.parse().unwrap()
}

/// An identity as the monitors would have left it after running `version`.
pub fn established_identity(version: &str) -> ClusterIdentity {
    ClusterIdentity {
        cluster_id: Uuid::new_v4(),
        cluster_name: NAMESPACE.to_string(),
        admin_secret: SecretRef {
            name: format!("{NAMESPACE}-mon"),
            key: "admin-secret".to_string(),
        },
        running_version: Some(self::version(version)),
    }
}

/// Answers `ceph --version` with the version in the image tag.
pub fn version_probe_runner(logctx: &LogContext) -> Arc<FakeProcessRunner> {
    let runner = FakeProcessRunner::new(&test_component_log(logctx, "probe"));
    runner.set_handler(Box::new(|image, _args| {
        let tag = image.rsplit_once(":v").map(|(_, tag)| tag).unwrap_or("");
        Ok(ProcessOutput {
            stdout: format!("ceph version {tag} (0123abcd) stable\n"),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }));
    runner
}

pub struct TestCluster {
    pub orchestrator: Arc<ClusterOrchestrator>,
    pub workloads: Arc<FakeWorkloadManager>,
    pub status: Arc<FakeStatusReader>,
    pub runner: Arc<FakeProcessRunner>,
    pub child: Arc<RecordingChild>,
}

pub struct TestClusterBuilder<'a> {
    logctx: &'a LogContext,
    spec: ClusterSpec,
    config: OrchestratorConfig,
    identity_store: Option<Arc<dyn IdentityStore>>,
    status: Arc<FakeStatusReader>,
}

impl<'a> TestClusterBuilder<'a> {
    pub fn new(logctx: &'a LogContext, version: &str) -> Self {
        TestClusterBuilder {
            logctx,
            spec: spec(version),
            config: config(),
            identity_store: None,
            status: FakeStatusReader::new(),
        }
    }

    pub fn identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity_store = Some(store);
        self
    }

    pub fn status(mut self, status: Arc<FakeStatusReader>) -> Self {
        self.status = status;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TestCluster {
        let workloads = FakeWorkloadManager::new();
        let runner = version_probe_runner(self.logctx);
        let identity_store = self.identity_store.unwrap_or_else(|| {
            FakeIdentityStore::new() as Arc<dyn IdentityStore>
        });
        let facilities = Facilities {
            workloads: workloads.clone(),
            status: self.status.clone(),
            identity_store,
            process_runner: runner.clone().as_runner(),
        };
        let orchestrator = Arc::new(ClusterOrchestrator::new(
            &test_component_log(self.logctx, "orchestrator"),
            cluster_ref(),
            self.config,
            facilities,
            self.spec,
        ));
        let child = RecordingChild::new();
        orchestrator.register_child("pools", child.clone());
        TestCluster {
            orchestrator,
            workloads,
            status: self.status,
            runner,
            child,
        }
    }
}
