// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Brings up the daemon roles of one cluster, in order.
//!
//! The phases of a pass are:
//!
//! 1. ensure the configuration placeholder exists
//! 2. start the monitors, establishing the cluster identity if this is the
//!    first time
//! 3. check the identity really is established
//! 4. start the managers
//! 5. start the storage nodes
//! 6. start the mirroring agents
//! 7. mark the cluster initialized
//! 8. notify child controllers
//!
//! Any phase failing ends the pass; later phases never run against a
//! partially-started predecessor.

use crate::error::PassPhase;
use crate::facilities::ClusterRef;
use crate::facilities::ConfigPlaceholder;
use crate::facilities::Facilities;
use crate::facilities::IdentityStoreError;
use crate::facilities::RoleReadiness;
use crate::facilities::RoleSpec;
use crate::facilities::WorkloadError;
use crate::notifier::ChildRegistry;
use crate::notifier::NotifySummary;
use crate::roles::build_role_spec;
use crate::roles::check_memory;
use crate::roles::InsufficientMemory;
use crate::roles::PassInputs;
use cluster_types::ClusterIdentity;
use cluster_types::ClusterSpec;
use cluster_types::RoleKind;
use cluster_types::RunningVersionSet;
use cluster_types::SoftwareVersion;
use operator_common::backoff::retry_notify;
use operator_common::backoff::retry_policy_role_readiness;
use operator_common::backoff::BackoffError;
use slog::debug;
use slog::info;
use slog::Logger;
use slog_error_chain::SlogInlineError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;
use uuid::Uuid;

/// Why one role could not be started.
#[derive(Debug, thiserror::Error)]
pub enum RoleStartError {
    #[error("workload request failed")]
    Workload(#[source] WorkloadError),

    #[error("{role} workloads not ready after {waited:?}: {detail}")]
    NotReady { role: RoleKind, waited: Duration, detail: String },

    #[error(transparent)]
    InsufficientMemory(#[from] InsufficientMemory),

    #[error("failed to record cluster identity")]
    IdentityStore(#[source] IdentityStoreError),
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum SequenceError {
    #[error("failed to ensure configuration placeholder")]
    ConfigPlaceholder(#[source] WorkloadError),

    #[error("failed to start monitors")]
    MonStartFailed(#[source] RoleStartError),

    #[error("cluster identity was not established by the monitors")]
    IdentityMissing,

    #[error("failed to start managers")]
    MgrStartFailed(#[source] RoleStartError),

    #[error("failed to start storage nodes")]
    OsdStartFailed(#[source] RoleStartError),

    #[error("failed to start mirroring agents")]
    MirrorStartFailed(#[source] RoleStartError),

    #[error("failed to record the version the cluster now runs")]
    VersionRecordFailed(#[source] IdentityStoreError),
}

impl SequenceError {
    pub fn phase(&self) -> PassPhase {
        match self {
            SequenceError::ConfigPlaceholder(_) => PassPhase::ConfigPlaceholder,
            SequenceError::MonStartFailed(_) => PassPhase::Monitors,
            SequenceError::IdentityMissing
            | SequenceError::VersionRecordFailed(_) => PassPhase::Identity,
            SequenceError::MgrStartFailed(_) => PassPhase::Managers,
            SequenceError::OsdStartFailed(_) => PassPhase::StorageNodes,
            SequenceError::MirrorStartFailed(_) => PassPhase::Mirroring,
        }
    }

    fn for_role(role: RoleKind, err: RoleStartError) -> SequenceError {
        match role {
            RoleKind::Mon => SequenceError::MonStartFailed(err),
            RoleKind::Mgr => SequenceError::MgrStartFailed(err),
            RoleKind::Osd => SequenceError::OsdStartFailed(err),
            RoleKind::RbdMirror => SequenceError::MirrorStartFailed(err),
        }
    }
}

/// Everything a pass decided before starting any role.
#[derive(Clone, Debug)]
pub struct PassContext {
    /// The pass's own copy of the desired spec.
    pub spec: ClusterSpec,
    pub desired_version: SoftwareVersion,
    pub is_upgrade: bool,
    pub running_versions: Option<RunningVersionSet>,
}

/// What a successful run of every phase produced.
#[derive(Clone, Debug)]
pub struct SequenceOutcome {
    pub identity: ClusterIdentity,
    pub notified: NotifySummary,
}

/// Roles started after the identity is known, in order.
const DEPENDENT_ROLES: [RoleKind; 3] =
    [RoleKind::Mgr, RoleKind::Osd, RoleKind::RbdMirror];

enum RoleWait {
    Converging(String),
    Failed(WorkloadError),
}

pub struct RoleSequencer<'a> {
    log: Logger,
    facilities: &'a Facilities,
    cluster: &'a ClusterRef,
    operator_image: &'a str,
    role_ready_timeout: Duration,
    children: &'a ChildRegistry,
    initialized: &'a AtomicBool,
}

impl<'a> RoleSequencer<'a> {
    pub fn new(
        log: &Logger,
        facilities: &'a Facilities,
        cluster: &'a ClusterRef,
        operator_image: &'a str,
        role_ready_timeout: Duration,
        children: &'a ChildRegistry,
        initialized: &'a AtomicBool,
    ) -> Self {
        RoleSequencer {
            log: log.new(slog::o!("component" => "RoleSequencer")),
            facilities,
            cluster,
            operator_image,
            role_ready_timeout,
            children,
            initialized,
        }
    }

    /// Runs every phase of one pass.
    ///
    /// `identity` is the identity known before the pass.  A newly created
    /// identity is stored there before the monitors start, so that a failure
    /// in a later phase does not lose it.  Its running version is only
    /// updated once every role has started on the desired version.
    pub async fn run(
        &self,
        ctx: &PassContext,
        identity: &mut Option<ClusterIdentity>,
    ) -> Result<SequenceOutcome, SequenceError> {
        let placeholder = ConfigPlaceholder::for_cluster(self.cluster);
        match self
            .facilities
            .workloads
            .ensure_config_placeholder(&placeholder)
            .await
        {
            Ok(()) => (),
            Err(err) if err.is_already_exists() => {
                debug!(self.log, "configuration placeholder already exists");
            }
            Err(err) => return Err(SequenceError::ConfigPlaceholder(err)),
        }

        self.start_monitors(ctx, identity)
            .await
            .map_err(SequenceError::MonStartFailed)?;

        let established = identity
            .as_ref()
            .filter(|id| id.is_established())
            .cloned()
            .ok_or(SequenceError::IdentityMissing)?;

        let inputs = PassInputs {
            cluster: self.cluster,
            spec: &ctx.spec,
            operator_image: self.operator_image,
            identity: &established,
            is_upgrade: ctx.is_upgrade,
            running_versions: ctx.running_versions.as_ref(),
        };
        for role in DEPENDENT_ROLES {
            self.start_role(role, &inputs)
                .await
                .map_err(|err| SequenceError::for_role(role, err))?;
        }

        // Only now is the desired version known to run on every role.
        let mut established = established;
        if established.running_version.as_ref() != Some(&ctx.desired_version) {
            established.running_version = Some(ctx.desired_version.clone());
            self.facilities
                .identity_store
                .save(&established)
                .await
                .map_err(SequenceError::VersionRecordFailed)?;
            info!(
                self.log,
                "recorded cluster version";
                "version" => %ctx.desired_version,
            );
            *identity = Some(established.clone());
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            self.log,
            "all roles started";
            "cluster_id" => %established.cluster_id,
            "is_upgrade" => ctx.is_upgrade,
        );

        let notified =
            self.children.notify_all(&ctx.spec, &established, ctx.is_upgrade);
        Ok(SequenceOutcome { identity: established, notified })
    }

    async fn start_monitors(
        &self,
        ctx: &PassContext,
        identity: &mut Option<ClusterIdentity>,
    ) -> Result<(), RoleStartError> {
        check_memory(RoleKind::Mon, &ctx.spec.resources_for(RoleKind::Mon))?;

        let current = match identity.as_ref().filter(|id| id.is_established())
        {
            Some(known) => known.clone(),
            None => {
                let created = self.create_identity().await?;
                *identity = Some(created.clone());
                created
            }
        };

        let inputs = PassInputs {
            cluster: self.cluster,
            spec: &ctx.spec,
            operator_image: self.operator_image,
            identity: &current,
            is_upgrade: ctx.is_upgrade,
            running_versions: ctx.running_versions.as_ref(),
        };
        let role = build_role_spec(&self.log, RoleKind::Mon, &inputs)?;
        self.converge(&role).await
    }

    /// Creates the cluster's identity.  Only ever called once per cluster:
    /// the result is saved before anything else happens.
    async fn create_identity(&self) -> Result<ClusterIdentity, RoleStartError> {
        let admin_secret = self
            .facilities
            .workloads
            .ensure_admin_secret(self.cluster)
            .await
            .map_err(RoleStartError::Workload)?;
        let created = ClusterIdentity {
            cluster_id: Uuid::new_v4(),
            cluster_name: self.cluster.namespace.clone(),
            admin_secret,
            running_version: None,
        };
        self.save_identity(&created).await?;
        info!(
            self.log,
            "established cluster identity";
            "cluster_id" => %created.cluster_id,
            "cluster_name" => &created.cluster_name,
        );
        Ok(created)
    }

    async fn save_identity(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<(), RoleStartError> {
        self.facilities
            .identity_store
            .save(identity)
            .await
            .map_err(RoleStartError::IdentityStore)
    }

    async fn start_role(
        &self,
        role: RoleKind,
        inputs: &PassInputs<'_>,
    ) -> Result<(), RoleStartError> {
        let spec = build_role_spec(&self.log, role, inputs)?;
        self.converge(&spec).await
    }

    /// Creates or updates `role` until the workload manager reports it
    /// ready, or the readiness timeout expires.
    async fn converge(&self, role: &RoleSpec) -> Result<(), RoleStartError> {
        let log = self.log.new(slog::o!("role" => role.kind.to_string()));
        info!(
            log,
            "starting role";
            "replicas" => ?role.replicas,
            "image" => &role.image,
        );
        let started = Instant::now();

        let attempt = || async {
            match self.facilities.workloads.create_or_update_role(role).await {
                Ok(RoleReadiness::Ready) => Ok(()),
                Ok(RoleReadiness::Converging { detail }) => {
                    Err(BackoffError::transient(RoleWait::Converging(detail)))
                }
                // Someone else created it first; that's what we wanted.
                Err(err) if err.is_already_exists() => Ok(()),
                Err(err) => Err(BackoffError::permanent(RoleWait::Failed(err))),
            }
        };
        let notify = |wait: RoleWait, delay: Duration| {
            if let RoleWait::Converging(detail) = wait {
                debug!(
                    log,
                    "role not ready yet";
                    "detail" => detail,
                    "retry_after" => ?delay,
                );
            }
        };

        retry_notify(
            retry_policy_role_readiness(self.role_ready_timeout),
            attempt,
            notify,
        )
        .await
        .map_err(|wait| match wait {
            RoleWait::Converging(detail) => RoleStartError::NotReady {
                role: role.kind,
                waited: started.elapsed(),
                detail,
            },
            RoleWait::Failed(err) => RoleStartError::Workload(err),
        })?;

        info!(log, "role ready"; "elapsed" => ?started.elapsed());
        Ok(())
    }
}
