// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turning the cluster spec into per-role requests for the workload manager.

use crate::facilities::ClusterRef;
use crate::facilities::RoleFeatures;
use crate::facilities::RoleSpec;
use cluster_types::spec::ResourceRequirements;
use cluster_types::ClusterIdentity;
use cluster_types::ClusterSpec;
use cluster_types::RoleKind;
use cluster_types::RunningVersionSet;
use cluster_types::SoftwareVersion;
use slog::error;
use slog::Logger;

/// More managers than this are never started.
pub const MAX_MGR_COUNT: u32 = 2;

/// Base name of the workloads backing `kind`.
pub fn workload_name(kind: RoleKind) -> String {
    format!("rook-ceph-{}", kind.daemon_name())
}

/// A role's configured memory is below what its daemons need.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error(
    "{role} memory {field} of {configured} MiB is below the minimum of \
     {minimum} MiB"
)]
pub struct InsufficientMemory {
    pub role: RoleKind,
    pub field: &'static str,
    pub configured: u64,
    pub minimum: u64,
}

/// Checks the memory request and limit of `role`, if either is set.
pub fn check_memory(
    role: RoleKind,
    resources: &ResourceRequirements,
) -> Result<(), InsufficientMemory> {
    let minimum = role.minimum_memory_mib();
    for (field, value) in [
        ("limit", resources.memory_limit_mib),
        ("request", resources.memory_request_mib),
    ] {
        if let Some(configured) = value {
            if configured < minimum {
                return Err(InsufficientMemory {
                    role,
                    field,
                    configured,
                    minimum,
                });
            }
        }
    }
    Ok(())
}

/// Per-pass inputs shared by every role.
pub struct PassInputs<'a> {
    pub cluster: &'a ClusterRef,
    pub spec: &'a ClusterSpec,
    pub operator_image: &'a str,
    pub identity: &'a ClusterIdentity,
    pub is_upgrade: bool,
    pub running_versions: Option<&'a RunningVersionSet>,
}

impl PassInputs<'_> {
    /// During an upgrade, the oldest version any daemon of `role` runs, so
    /// daemons can be restarted from the oldest up.  Falls back to the last
    /// version recorded for the cluster.
    fn current_version(&self, role: RoleKind) -> Option<SoftwareVersion> {
        if !self.is_upgrade {
            return None;
        }
        self.running_versions
            .and_then(|versions| versions.least_up_to_date(role))
            .or_else(|| self.identity.running_version.clone())
    }
}

/// Builds the request for `role`'s workloads.
pub fn build_role_spec(
    log: &Logger,
    role: RoleKind,
    inputs: &PassInputs<'_>,
) -> Result<RoleSpec, InsufficientMemory> {
    let spec = inputs.spec;
    let resources = spec.resources_for(role);
    check_memory(role, &resources)?;

    let mut replicas = spec.replicas_for(role);
    if role == RoleKind::Mgr {
        if let Some(requested) = replicas.filter(|n| *n > MAX_MGR_COUNT) {
            error!(
                log,
                "cannot have more than {} managers", MAX_MGR_COUNT;
                "requested" => requested,
            );
            replicas = Some(MAX_MGR_COUNT);
        }
    }

    let features = match role {
        RoleKind::Mon => RoleFeatures::Mon {
            allow_multiple_per_node: spec.mon.allow_multiple_per_node,
        },
        RoleKind::Mgr => RoleFeatures::Mgr {
            dashboard: spec.dashboard.clone(),
            monitoring: spec.monitoring.clone(),
            modules: spec.mgr.modules.clone(),
        },
        RoleKind::Osd => RoleFeatures::Osd { storage: spec.storage.clone() },
        RoleKind::RbdMirror => RoleFeatures::RbdMirror,
    };

    Ok(RoleSpec {
        kind: role,
        name: workload_name(role),
        namespace: inputs.cluster.namespace.clone(),
        owner: inputs.cluster.clone(),
        replicas,
        image: spec.software.image.clone(),
        operator_image: inputs.operator_image.to_string(),
        identity: inputs.identity.clone(),
        placement: spec.placement_for(role),
        resources,
        annotations: spec.annotations.clone(),
        network: spec.network.clone(),
        data_dir_host_path: spec.data_dir_host_path.clone(),
        is_upgrade: inputs.is_upgrade,
        current_version: inputs.current_version(role),
        features,
    })
}
