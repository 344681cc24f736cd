// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The orchestrator for one storage cluster

use crate::config::OrchestratorConfig;
use crate::error::PassError;
use crate::facilities::ClusterRef;
use crate::facilities::Facilities;
use crate::facilities::IdentityStoreError;
use crate::notifier::ChildController;
use crate::notifier::ChildRegistry;
use crate::notifier::NotifySummary;
use crate::scheduler::OrchestrationScheduler;
use crate::scheduler::OrchestrationState;
use crate::sequencer::PassContext;
use crate::sequencer::RoleSequencer;
use crate::spec_diff::cluster_changed;
use crate::status::CurrentStatus;
use crate::status::LastResult;
use crate::status::OrchestrationStatus;
use crate::status::PassResult;
use crate::upgrade_gate::UpgradeGate;
use crate::version_probe::VersionProbe;
use chrono::Utc;
use cluster_types::ClusterIdentity;
use cluster_types::ClusterSpec;
use cluster_types::SoftwareVersion;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::watch;

/// What one successful pass did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassSummary {
    pub iteration: u64,
    /// Generation of the spec the pass applied.
    pub spec_generation: u64,
    pub version: SoftwareVersion,
    pub is_upgrade: bool,
    pub identity: ClusterIdentity,
    pub notified: NotifySummary,
}

/// Result of a call to [`ClusterOrchestrator::orchestrate()`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrchestrationOutcome {
    /// Another caller is running a pass.  It will run one more pass for this
    /// request once it finishes.
    Deferred,
    /// This caller ran every pass that was requested; this is how the last
    /// one went.
    Completed(PassSummary),
}

struct DesiredSpec {
    spec: ClusterSpec,
    generation: u64,
}

/// Reconciles one cluster's desired spec against the live cluster.
///
/// Any number of tasks may call [`ClusterOrchestrator::orchestrate()`]
/// concurrently; passes never overlap and requests that arrive during a pass
/// are coalesced into one more pass.
pub struct ClusterOrchestrator {
    log: Logger,
    cluster: ClusterRef,
    config: OrchestratorConfig,
    facilities: Facilities,
    probe: VersionProbe,
    gate: UpgradeGate,
    desired: Mutex<DesiredSpec>,
    /// Only written by the running pass.
    identity: Mutex<Option<ClusterIdentity>>,
    scheduler: OrchestrationScheduler,
    children: ChildRegistry,
    initialized: AtomicBool,
    iteration: AtomicU64,
    status_tx: watch::Sender<OrchestrationStatus>,
}

impl ClusterOrchestrator {
    pub fn new(
        log: &Logger,
        cluster: ClusterRef,
        config: OrchestratorConfig,
        facilities: Facilities,
        spec: ClusterSpec,
    ) -> Self {
        let log = log.new(slog::o!(
            "component" => "ClusterOrchestrator",
            "cluster" => cluster.name.clone(),
            "namespace" => cluster.namespace.clone(),
        ));
        let probe = VersionProbe::new(&log, facilities.process_runner.clone());
        let gate = UpgradeGate::new(
            &log,
            facilities.status.clone(),
            config.upgrade.clone(),
        );
        let children = ChildRegistry::new(&log);
        let (status_tx, _) = watch::channel(OrchestrationStatus::default());
        ClusterOrchestrator {
            log,
            cluster,
            config,
            facilities,
            probe,
            gate,
            desired: Mutex::new(DesiredSpec { spec, generation: 1 }),
            identity: Mutex::new(None),
            scheduler: OrchestrationScheduler::new(),
            children,
            initialized: AtomicBool::new(false),
            iteration: AtomicU64::new(0),
            status_tx,
        }
    }

    pub fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }

    /// Records a new desired spec.
    ///
    /// Returns true if it differs from the current one, in which case the
    /// caller should follow up with [`ClusterOrchestrator::orchestrate()`].
    /// An identical spec is dropped and its generation is not bumped.
    pub fn update_spec(&self, new: ClusterSpec) -> bool {
        let mut desired = self.desired.lock().unwrap();
        let change = cluster_changed(&self.log, &desired.spec, &new);
        if !change.changed {
            debug!(
                self.log,
                "cluster spec unchanged";
                "generation" => desired.generation,
            );
            return false;
        }
        desired.spec = new;
        desired.generation += 1;
        info!(
            self.log,
            "cluster spec changed";
            "generation" => desired.generation,
            "diff" => change.diff.unwrap_or_else(|| "<unavailable>".to_string()),
        );
        true
    }

    /// Generation of the most recently recorded spec.
    pub fn spec_generation(&self) -> u64 {
        self.desired.lock().unwrap().generation
    }

    pub fn register_child(
        &self,
        name: impl Into<String>,
        child: Arc<dyn ChildController>,
    ) {
        self.children.register(name, child);
    }

    /// Whether at least one pass has started every role since this process
    /// started.
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> OrchestrationStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<OrchestrationStatus> {
        self.status_tx.subscribe()
    }

    pub fn scheduler_state(&self) -> OrchestrationState {
        self.scheduler.state()
    }

    /// The identity known to this orchestrator, if any pass has got that far.
    pub fn identity(&self) -> Option<ClusterIdentity> {
        self.identity.lock().unwrap().clone()
    }

    /// Requests a pass and, unless another caller is already running one,
    /// runs passes until no more are requested.
    ///
    /// Returns the result of the last pass this caller ran.  Earlier failures
    /// are logged and reported through [`ClusterOrchestrator::status()`].
    pub async fn orchestrate(&self) -> Result<OrchestrationOutcome, PassError> {
        self.scheduler.request_orchestration();

        let mut last: Option<Result<PassSummary, PassError>> = None;
        while let Some(claim) = self.scheduler.try_claim() {
            if let Some(Err(err)) = &last {
                info!(
                    self.log,
                    "running another pass after a failed one";
                    "error" => err,
                );
            }
            last = Some(self.run_pass().await);
            claim.release();
        }

        match last {
            None => {
                debug!(self.log, "a pass is already running; request queued");
                Ok(OrchestrationOutcome::Deferred)
            }
            Some(result) => result.map(OrchestrationOutcome::Completed),
        }
    }

    async fn run_pass(&self) -> Result<PassSummary, PassError> {
        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;
        let (spec, spec_generation) = {
            let desired = self.desired.lock().unwrap();
            (desired.spec.clone(), desired.generation)
        };
        let started_at = Utc::now();
        let start_instant = Instant::now();
        let log = self.log.new(slog::o!(
            "iteration" => iteration,
            "spec_generation" => spec_generation,
        ));

        self.status_tx.send_modify(|status| {
            status.current = CurrentStatus::Running {
                iteration,
                started_at,
                spec_generation,
            };
        });
        info!(log, "starting orchestration pass"; "image" => &spec.software.image);

        let result = self.pass_body(&log, spec).await.map(
            |(version, is_upgrade, identity, notified)| PassSummary {
                iteration,
                spec_generation,
                version,
                is_upgrade,
                identity,
                notified,
            },
        );

        let elapsed = start_instant.elapsed();
        let pass_result = match &result {
            Ok(summary) => {
                info!(
                    log,
                    "orchestration pass succeeded";
                    "elapsed" => ?elapsed,
                    "version" => %summary.version,
                    "is_upgrade" => summary.is_upgrade,
                );
                PassResult::Succeeded { is_upgrade: summary.is_upgrade }
            }
            Err(err) => {
                if err.is_fatal_retriable() {
                    error!(
                        log,
                        "orchestration pass refused; the spec or the cluster \
                         must change before it can succeed";
                        "phase" => %err.phase(),
                        "error" => err,
                    );
                } else {
                    error!(
                        log,
                        "orchestration pass failed";
                        "phase" => %err.phase(),
                        "error" => err,
                    );
                }
                PassResult::Failed {
                    phase: err.phase(),
                    message: InlineErrorChain::new(err).to_string(),
                    retriable: err.is_fatal_retriable(),
                }
            }
        };

        self.status_tx.send_modify(|status| {
            *status = OrchestrationStatus {
                current: CurrentStatus::Idle,
                last: LastResult::Completed {
                    iteration,
                    started_at,
                    elapsed,
                    result: pass_result,
                },
            };
        });
        result
    }

    async fn pass_body(
        &self,
        log: &Logger,
        spec: ClusterSpec,
    ) -> Result<
        (SoftwareVersion, bool, ClusterIdentity, NotifySummary),
        PassError,
    > {
        let desired_version = self
            .probe
            .detect(&spec.software.image, self.config.version_probe.timeout)
            .await
            .map_err(PassError::Probe)?;

        let mut identity =
            self.known_identity(log).await.map_err(PassError::IdentityLoad)?;

        let outcome = self
            .gate
            .evaluate(
                &desired_version,
                spec.software.allow_unsupported,
                identity.as_ref(),
            )
            .await
            .map_err(PassError::Gate)?;

        let ctx = PassContext {
            spec,
            desired_version,
            is_upgrade: outcome.is_upgrade,
            running_versions: outcome.running_versions,
        };
        let sequencer = RoleSequencer::new(
            log,
            &self.facilities,
            &self.cluster,
            &self.config.operator_image,
            self.config.role_ready_timeout,
            &self.children,
            &self.initialized,
        );
        let result = sequencer.run(&ctx, &mut identity).await;
        // Whatever the monitors established is kept even if a later phase
        // failed.
        *self.identity.lock().unwrap() = identity;
        let outcome = result.map_err(PassError::Sequence)?;

        Ok((
            ctx.desired_version,
            ctx.is_upgrade,
            outcome.identity,
            outcome.notified,
        ))
    }

    /// The identity from memory, or else from the identity store.
    async fn known_identity(
        &self,
        log: &Logger,
    ) -> Result<Option<ClusterIdentity>, IdentityStoreError> {
        let in_memory = self.identity.lock().unwrap().clone();
        if in_memory.is_some() {
            return Ok(in_memory);
        }
        let loaded = self.facilities.identity_store.load().await?;
        match &loaded {
            Some(identity) if !identity.is_established() => {
                warn!(
                    log,
                    "stored cluster identity is incomplete";
                    "cluster_id" => %identity.cluster_id,
                );
            }
            Some(identity) => {
                info!(
                    log,
                    "loaded cluster identity";
                    "cluster_id" => %identity.cluster_id,
                );
            }
            None => info!(log, "no cluster identity yet; this is a new cluster"),
        }
        Ok(loaded)
    }
}
