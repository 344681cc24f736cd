// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Requests made while a pass is running

use crate::common::spec;
use crate::common::TestClusterBuilder;
use assert_matches::assert_matches;
use cluster_orchestrator::scheduler::OrchestrationState;
use cluster_orchestrator::status::CurrentStatus;
use cluster_orchestrator::OrchestrationOutcome;
use cluster_types::RoleKind;
use futures::future;
use operator_test_utils::dev::test_setup_log;
use std::time::Duration;

#[tokio::test]
async fn requests_during_a_pass_coalesce_into_one_more() {
    let logctx =
        test_setup_log("requests_during_a_pass_coalesce_into_one_more");
    let cluster = TestClusterBuilder::new(&logctx, "14.2.1").build();
    cluster.status.set_uniform_version("14.2.1");
    let mut hold = cluster.workloads.hold_role(RoleKind::Mon);

    let orchestrator = cluster.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.orchestrate().await });
    let entered = hold.entered.recv().await.expect("first pass reached mons");
    assert_eq!(entered.replicas, Some(3));

    let status = cluster.orchestrator.status();
    assert_matches!(
        status.current,
        CurrentStatus::Running { iteration: 1, spec_generation: 1, .. }
    );

    // Every spec change made while the pass is blocked asks for another
    // pass; none of them runs one.
    for count in [4, 5, 6] {
        let mut changed = spec("14.2.1");
        changed.mon.count = count;
        assert!(cluster.orchestrator.update_spec(changed));
        let outcome = cluster.orchestrator.orchestrate().await.unwrap();
        assert_eq!(outcome, OrchestrationOutcome::Deferred);
    }
    assert_eq!(
        cluster.orchestrator.scheduler_state(),
        OrchestrationState { needed: true, running: true }
    );
    assert_eq!(cluster.workloads.applied_kinds(), vec![RoleKind::Mon]);

    hold.release.notify_one();
    let outcome = tokio::time::timeout(Duration::from_secs(30), first)
        .await
        .expect("passes finished")
        .expect("task did not panic")
        .expect("passes succeeded");

    // Exactly one more pass ran, against the newest spec.
    let summary =
        assert_matches!(outcome, OrchestrationOutcome::Completed(s) => s);
    assert_eq!(summary.iteration, 2);
    assert_eq!(summary.spec_generation, 4);
    let mon_replicas: Vec<_> = cluster
        .workloads
        .applied()
        .iter()
        .filter(|role| role.kind == RoleKind::Mon)
        .map(|role| role.replicas)
        .collect();
    assert_eq!(mon_replicas, vec![Some(3), Some(6)]);
    assert_eq!(cluster.child.notifications().len(), 2);
    assert_eq!(cluster.workloads.admin_secret_calls(), 1);

    assert_eq!(
        cluster.orchestrator.scheduler_state(),
        OrchestrationState { needed: false, running: false }
    );
    assert_eq!(cluster.orchestrator.status().current, CurrentStatus::Idle);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn status_watchers_see_each_pass() {
    let logctx = test_setup_log("status_watchers_see_each_pass");
    let cluster = TestClusterBuilder::new(&logctx, "14.2.1").build();
    let mut watcher = cluster.orchestrator.watch_status();
    assert_eq!(watcher.borrow_and_update().last.result(), None);

    cluster.orchestrator.orchestrate().await.unwrap();
    assert!(watcher.has_changed().unwrap());
    let status = watcher.borrow_and_update().clone();
    assert_eq!(status.current, CurrentStatus::Idle);
    assert_matches!(
        status.last,
        cluster_orchestrator::status::LastResult::Completed {
            iteration: 1,
            ..
        }
    );
    logctx.cleanup_successful();
}

#[tokio::test]
async fn concurrent_callers_never_overlap_passes() {
    let logctx = test_setup_log("concurrent_callers_never_overlap_passes");
    let cluster = TestClusterBuilder::new(&logctx, "14.2.1").build();
    cluster.status.set_uniform_version("14.2.1");
    // Slow the monitors down so that callers pile up behind the first pass.
    cluster.workloads.not_ready_polls(RoleKind::Mon, 2);

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = cluster.orchestrator.clone();
            tokio::spawn(async move { orchestrator.orchestrate().await })
        })
        .collect();

    let mut completed = Vec::new();
    for result in future::join_all(callers).await {
        match result.unwrap().unwrap() {
            OrchestrationOutcome::Deferred => (),
            OrchestrationOutcome::Completed(summary) => {
                completed.push(summary.iteration)
            }
        }
    }

    // Passes ran one at a time, so no two callers report the same iteration
    // and the highest one is the last pass run.
    assert!(!completed.is_empty());
    let passes = cluster.child.notifications().len() as u64;
    assert!((1..=8).contains(&passes));
    let mut iterations = completed.clone();
    iterations.sort_unstable();
    iterations.dedup();
    assert_eq!(iterations.len(), completed.len());
    assert_eq!(iterations.last().copied(), Some(passes));
    assert_eq!(
        cluster.orchestrator.scheduler_state(),
        OrchestrationState { needed: false, running: false }
    );
    logctx.cleanup_successful();
}
