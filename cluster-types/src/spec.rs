// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The desired state of a storage cluster.

use crate::RoleKind;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Desired state of one storage cluster
///
/// The orchestrator treats this as a plain value: every pass works from its
/// own clone, taken when the pass starts.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Software image the daemons should run.
    pub software: SoftwareSpec,
    /// Path on each host where daemons keep their configuration and data.
    #[serde(default)]
    pub data_dir_host_path: String,
    #[serde(default)]
    pub mon: MonSpec,
    #[serde(default)]
    pub mgr: MgrSpec,
    #[serde(default)]
    pub rbd_mirroring: RbdMirroringSpec,
    #[serde(default)]
    pub storage: StorageSpec,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default)]
    pub dashboard: DashboardSpec,
    #[serde(default)]
    pub monitoring: MonitoringSpec,
    #[serde(default)]
    pub placement: PlacementSpec,
    /// Resource requirements per role.
    #[serde(default)]
    pub resources: BTreeMap<RoleKind, ResourceRequirements>,
    /// Annotations applied to every daemon's workload.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ClusterSpec {
    /// Placement for daemons of `role`: the cluster-wide placement with the
    /// role-specific one layered on top.
    pub fn placement_for(&self, role: RoleKind) -> Placement {
        let mut placement = self.placement.all.clone().unwrap_or_default();
        if let Some(specific) = self.placement.roles.get(&role) {
            placement.node_selector.extend(
                specific
                    .node_selector
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            placement.tolerations.extend(specific.tolerations.iter().cloned());
        }
        placement
    }

    pub fn resources_for(&self, role: RoleKind) -> ResourceRequirements {
        self.resources.get(&role).cloned().unwrap_or_default()
    }

    /// Number of daemons requested for `role`.
    ///
    /// Storage nodes are not counted here: their number follows from the
    /// storage selection.
    pub fn replicas_for(&self, role: RoleKind) -> Option<u32> {
        match role {
            RoleKind::Mon => Some(self.mon.count),
            RoleKind::Mgr => Some(self.mgr.count),
            RoleKind::Osd => None,
            RoleKind::RbdMirror => Some(self.rbd_mirroring.workers),
        }
    }
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareSpec {
    /// Image reference, e.g. `quay.io/ceph/ceph:v14.2.1`.
    pub image: String,
    /// Permit running a version that is not on the supported list.
    #[serde(default)]
    pub allow_unsupported: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonSpec {
    pub count: u32,
    #[serde(default)]
    pub allow_multiple_per_node: bool,
}

impl Default for MonSpec {
    fn default() -> Self {
        MonSpec { count: 3, allow_multiple_per_node: false }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MgrSpec {
    pub count: u32,
    /// Manager modules to enable beyond the defaults.
    #[serde(default)]
    pub modules: Vec<String>,
}

impl Default for MgrSpec {
    fn default() -> Self {
        MgrSpec { count: 1, modules: Vec::new() }
    }
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct RbdMirroringSpec {
    /// Number of mirroring agents; zero disables mirroring.
    pub workers: u32,
}

/// Which hosts and devices the storage nodes consume.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default)]
    pub use_all_nodes: bool,
    #[serde(default)]
    pub use_all_devices: bool,
    /// Regular expression selecting devices by name.
    #[serde(default)]
    pub device_filter: Option<String>,
    /// Explicit node list.  Order carries no meaning.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
    #[serde(default)]
    pub device_filter: Option<String>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    pub name: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default)]
    pub mode: NetworkMode,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// Daemons get platform-assigned addresses.
    #[default]
    Default,
    /// Daemons share the host's network namespace.
    Host,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url_prefix: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub ssl: bool,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Namespace for alerting rules; defaults to the cluster's own.
    #[serde(default)]
    pub rules_namespace: Option<String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSpec {
    /// Applies to every role.
    #[serde(default)]
    pub all: Option<Placement>,
    /// Layered on top of `all` for the given role.
    #[serde(default, flatten)]
    pub roles: BTreeMap<RoleKind, Placement>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub effect: Option<String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default)]
    pub cpu_millis: Option<u64>,
    #[serde(default)]
    pub memory_request_mib: Option<u64>,
    #[serde(default)]
    pub memory_limit_mib: Option<u64>,
}
