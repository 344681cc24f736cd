// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Passes that change the version an established cluster runs

use crate::common::config;
use crate::common::established_identity;
use crate::common::image;
use crate::common::version;
use crate::common::TestClusterBuilder;
use assert_matches::assert_matches;
use cluster_orchestrator::fakes::FakeIdentityStore;
use cluster_orchestrator::fakes::FakeStatusReader;
use cluster_orchestrator::status::PassResult;
use cluster_orchestrator::upgrade_gate::GateError;
use cluster_orchestrator::upgrade_gate::UnhealthyReason;
use cluster_orchestrator::upgrade_gate::UnsupportedReason;
use cluster_orchestrator::OrchestrationOutcome;
use cluster_orchestrator::PassError;
use cluster_orchestrator::PassPhase;
use cluster_types::RoleKind;
use cluster_types::RunningVersionSet;
use operator_test_utils::dev::test_setup_log;
use std::collections::BTreeMap;

fn reported(version: &str) -> String {
    format!("ceph version {version} (0123abcd) stable")
}

#[tokio::test]
async fn unhealthy_cluster_blocks_upgrade() {
    let logctx = test_setup_log("unhealthy_cluster_blocks_upgrade");
    let store =
        FakeIdentityStore::with_identity(established_identity("13.2.6"));
    let status = FakeStatusReader::new();
    status.set_uniform_version("13.2.6");
    status.set_unhealthy("HEALTH_WARN 1 pgs degraded");
    let cluster = TestClusterBuilder::new(&logctx, "14.2.1")
        .identity_store(store.clone())
        .status(status)
        .build();

    let err = cluster.orchestrator.orchestrate().await.unwrap_err();
    assert_matches!(
        &err,
        PassError::Gate(GateError::UpgradeBlockedUnhealthy {
            desired,
            reason: UnhealthyReason::Reported { summary },
        }) if *desired == version("14.2.1")
            && summary == "HEALTH_WARN 1 pgs degraded"
    );
    assert_eq!(err.phase(), PassPhase::UpgradeGate);
    assert!(err.is_fatal_retriable());
    assert_eq!(cluster.status.health_calls(), 1);

    // Nothing was touched.
    assert!(cluster.workloads.placeholders().is_empty());
    assert!(cluster.workloads.applied().is_empty());
    assert_eq!(store.save_count(), 0);
    assert!(cluster.child.notifications().is_empty());
    assert_matches!(
        cluster.orchestrator.status().last.result(),
        Some(PassResult::Failed {
            phase: PassPhase::UpgradeGate,
            retriable: true,
            ..
        })
    );

    // Once the cluster recovers the same spec goes through.
    cluster.status.set_healthy();
    let summary = assert_matches!(
        cluster.orchestrator.orchestrate().await.unwrap(),
        OrchestrationOutcome::Completed(s) => s
    );
    assert!(summary.is_upgrade);
    assert_eq!(summary.iteration, 2);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn healthy_upgrade_rolls_every_role() {
    let logctx = test_setup_log("healthy_upgrade_rolls_every_role");
    let before = established_identity("13.2.6");
    let store = FakeIdentityStore::with_identity(before.clone());
    let status = FakeStatusReader::new();
    status.set_uniform_version("13.2.6");
    let cluster = TestClusterBuilder::new(&logctx, "14.2.1")
        .identity_store(store.clone())
        .status(status)
        .build();

    let summary = assert_matches!(
        cluster.orchestrator.orchestrate().await.unwrap(),
        OrchestrationOutcome::Completed(s) => s
    );
    assert!(summary.is_upgrade);
    assert_eq!(summary.version, version("14.2.1"));
    assert_eq!(cluster.status.health_calls(), 1);
    assert_eq!(cluster.workloads.admin_secret_calls(), 0);

    let applied = cluster.workloads.applied();
    assert_eq!(applied.len(), 4);
    for role in &applied {
        assert!(role.is_upgrade, "{} not marked as upgrading", role.kind);
        assert_eq!(role.image, image("14.2.1"));
        assert_eq!(role.current_version, Some(version("13.2.6")));
        assert!(role.identity.same_cluster(&before));
    }

    // The identity keeps its id and now records the new version.
    let after = store.current().unwrap();
    assert!(after.same_cluster(&before));
    assert_eq!(after.running_version, Some(version("14.2.1")));
    assert_eq!(summary.identity, after);

    let notifications = cluster.child.notifications();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].2);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn downgrade_is_rejected() {
    let logctx = test_setup_log("downgrade_is_rejected");
    let store =
        FakeIdentityStore::with_identity(established_identity("14.2.1"));
    let status = FakeStatusReader::new();
    status.set_uniform_version("14.2.1");
    let cluster = TestClusterBuilder::new(&logctx, "13.2.6")
        .identity_store(store)
        .status(status)
        .build();

    let err = cluster.orchestrator.orchestrate().await.unwrap_err();
    assert_matches!(
        &err,
        PassError::Gate(GateError::DowngradeRejected { desired, running })
            if *desired == version("13.2.6") && *running == version("14.2.1")
    );
    assert!(err.is_fatal_retriable());
    assert_eq!(cluster.status.health_calls(), 0);
    assert!(cluster.workloads.applied().is_empty());
    logctx.cleanup_successful();
}

#[tokio::test]
async fn mixed_versions_continue_an_upgrade() {
    let logctx = test_setup_log("mixed_versions_continue_an_upgrade");
    let store =
        FakeIdentityStore::with_identity(established_identity("14.2.1"));
    let status = FakeStatusReader::new();
    // The monitors already moved; one storage node has not.
    let mut versions = RunningVersionSet::default();
    versions.mon = BTreeMap::from([(reported("14.2.1"), 3)]);
    versions.mgr = BTreeMap::from([(reported("14.2.1"), 1)]);
    versions.osd =
        BTreeMap::from([(reported("13.2.6"), 1), (reported("14.2.1"), 2)]);
    versions.overall =
        BTreeMap::from([(reported("13.2.6"), 1), (reported("14.2.1"), 6)]);
    status.set_versions(versions);
    let cluster = TestClusterBuilder::new(&logctx, "14.2.1")
        .identity_store(store)
        .status(status)
        .build();

    let summary = assert_matches!(
        cluster.orchestrator.orchestrate().await.unwrap(),
        OrchestrationOutcome::Completed(s) => s
    );
    assert!(summary.is_upgrade);
    assert_eq!(cluster.status.health_calls(), 1);

    let current: BTreeMap<_, _> = cluster
        .workloads
        .applied()
        .into_iter()
        .map(|role| (role.kind, role.current_version))
        .collect();
    assert_eq!(current[&RoleKind::Osd], Some(version("13.2.6")));
    assert_eq!(current[&RoleKind::Mon], Some(version("14.2.1")));
    logctx.cleanup_successful();
}

#[tokio::test]
async fn unsupported_release_needs_permission() {
    let logctx = test_setup_log("unsupported_release_needs_permission");
    let cluster = TestClusterBuilder::new(&logctx, "15.2.0").build();

    let err = cluster.orchestrator.orchestrate().await.unwrap_err();
    assert_matches!(
        err,
        PassError::Gate(GateError::UnsupportedVersion {
            reason: UnsupportedReason::NotOnSupportedList,
            ..
        })
    );
    assert!(!err.is_fatal_retriable());
    assert!(cluster.workloads.applied().is_empty());

    let mut allowed = crate::common::spec("15.2.0");
    allowed.software.allow_unsupported = true;
    assert!(cluster.orchestrator.update_spec(allowed));
    let summary = assert_matches!(
        cluster.orchestrator.orchestrate().await.unwrap(),
        OrchestrationOutcome::Completed(s) => s
    );
    assert_eq!(summary.version, version("15.2.0"));
    assert_eq!(summary.spec_generation, 2);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn unknown_versions_proceed_unless_configured_otherwise() {
    let logctx =
        test_setup_log("unknown_versions_proceed_unless_configured_otherwise");

    // By default, a cluster that cannot report its versions is treated as
    // not upgrading.
    let status = FakeStatusReader::new();
    status.set_versions_error("mon command timed out");
    status.set_unhealthy("HEALTH_ERR");
    let cluster = TestClusterBuilder::new(&logctx, "14.2.1")
        .identity_store(FakeIdentityStore::with_identity(
            established_identity("13.2.6"),
        ))
        .status(status)
        .build();
    let summary = assert_matches!(
        cluster.orchestrator.orchestrate().await.unwrap(),
        OrchestrationOutcome::Completed(s) => s
    );
    assert!(!summary.is_upgrade);
    assert_eq!(cluster.status.health_calls(), 0);

    // With the knob set, the version change is held back until the cluster
    // is healthy.
    let mut strict = config();
    strict.upgrade.require_health_on_unknown_versions = true;
    let status = FakeStatusReader::new();
    status.set_versions_error("mon command timed out");
    status.set_unhealthy("HEALTH_ERR");
    let cluster = TestClusterBuilder::new(&logctx, "14.2.1")
        .identity_store(FakeIdentityStore::with_identity(
            established_identity("13.2.6"),
        ))
        .status(status)
        .config(strict)
        .build();
    let err = cluster.orchestrator.orchestrate().await.unwrap_err();
    assert_matches!(
        err,
        PassError::Gate(GateError::UpgradeBlockedUnhealthy { .. })
    );
    assert_eq!(cluster.status.health_calls(), 1);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn partial_upgrade_still_requires_health_on_unknown_versions() {
    let logctx = test_setup_log(
        "partial_upgrade_still_requires_health_on_unknown_versions",
    );
    let store =
        FakeIdentityStore::with_identity(established_identity("13.2.6"));
    let status = FakeStatusReader::new();
    status.set_uniform_version("13.2.6");
    let mut strict = config();
    strict.upgrade.require_health_on_unknown_versions = true;
    let cluster = TestClusterBuilder::new(&logctx, "14.2.1")
        .identity_store(store.clone())
        .status(status)
        .config(strict)
        .build();

    // The monitors move to the new version; the managers never start.
    cluster.workloads.fail_role(RoleKind::Mgr, "image pull failed");
    let err = cluster.orchestrator.orchestrate().await.unwrap_err();
    assert_eq!(err.phase(), PassPhase::Managers);
    assert_eq!(cluster.status.health_calls(), 1);
    assert_eq!(
        store.current().unwrap().running_version,
        Some(version("13.2.6"))
    );

    // The cluster now cannot say what it runs and is unhealthy. The
    // recorded version still differs from the desired one, so the change is
    // still held back.
    cluster.workloads.clear_failure(RoleKind::Mgr);
    cluster.status.set_versions_error("mon command timed out");
    cluster.status.set_unhealthy("HEALTH_WARN mons running mixed versions");
    let err = cluster.orchestrator.orchestrate().await.unwrap_err();
    assert_matches!(
        err,
        PassError::Gate(GateError::UpgradeBlockedUnhealthy { .. })
    );
    assert_eq!(cluster.status.health_calls(), 2);
    assert_eq!(
        cluster.workloads.applied_kinds(),
        vec![RoleKind::Mon, RoleKind::Mgr]
    );

    cluster.status.set_healthy();
    let summary = assert_matches!(
        cluster.orchestrator.orchestrate().await.unwrap(),
        OrchestrationOutcome::Completed(s) => s
    );
    assert_eq!(summary.iteration, 3);
    assert_eq!(
        store.current().unwrap().running_version,
        Some(version("14.2.1"))
    );
    logctx.cleanup_successful();
}
