// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// The daemon roles that make up a storage cluster, in startup order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
pub enum RoleKind {
    /// Metadata monitors.  The first monitors to come up establish the
    /// cluster's identity.
    Mon,
    /// Managers.
    Mgr,
    /// Storage nodes.
    Osd,
    /// Block-device mirroring agents.
    RbdMirror,
}

impl RoleKind {
    /// Name of this role's daemons as reported by the storage engine.
    pub fn daemon_name(&self) -> &'static str {
        match self {
            RoleKind::Mon => "mon",
            RoleKind::Mgr => "mgr",
            RoleKind::Osd => "osd",
            RoleKind::RbdMirror => "rbd-mirror",
        }
    }

    /// Memory below which a daemon of this role is not allowed to run.
    pub fn minimum_memory_mib(&self) -> u64 {
        match self {
            RoleKind::Mon => 1024,
            RoleKind::Mgr => 512,
            RoleKind::Osd => 2048,
            RoleKind::RbdMirror => 512,
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.daemon_name())
    }
}
