// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::SoftwareVersion;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Reference to a secret held by the platform.  We never see the secret's
/// contents.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
pub struct SecretRef {
    pub name: String,
    pub key: String,
}

/// Facts about a cluster that only exist once its monitors have started for
/// the first time
///
/// The cluster id and admin credentials are created exactly once per cluster
/// lifetime and reused by every later pass.  Only `running_version` changes,
/// once a pass has started every role on a new version.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ClusterIdentity {
    /// Unique id of the cluster (the storage engine's fsid).
    pub cluster_id: Uuid,
    /// Name the storage engine knows the cluster by.
    pub cluster_name: String,
    /// Admin credential material.
    pub admin_secret: SecretRef,
    /// Version every role was last started on.  `None` until a pass has
    /// started every role at least once.
    pub running_version: Option<SoftwareVersion>,
}

impl ClusterIdentity {
    /// Whether every fact that later roles depend on is present.
    pub fn is_established(&self) -> bool {
        !self.cluster_id.is_nil()
            && !self.cluster_name.is_empty()
            && !self.admin_secret.name.is_empty()
            && !self.admin_secret.key.is_empty()
    }

    /// Whether some pass has started every role with this identity.  Until
    /// then no daemon can be relied on to report a version.
    pub fn is_bootstrapped(&self) -> bool {
        self.is_established() && self.running_version.is_some()
    }

    /// Returns true if `other` describes the same cluster with the same
    /// credentials (the running version is allowed to differ).
    pub fn same_cluster(&self, other: &ClusterIdentity) -> bool {
        self.cluster_id == other.cluster_id
            && self.cluster_name == other.cluster_name
            && self.admin_secret == other.admin_secret
    }
}
