// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared between the cluster orchestrator and the services it drives.
//!
//! [`ClusterSpec`] is the desired state handed to us by whoever owns the
//! cluster resource.  [`ClusterIdentity`] only exists once the monitors have
//! come up for the first time.  [`SoftwareVersion`] and [`RunningVersionSet`]
//! feed the upgrade gate.

pub mod identity;
pub mod role;
pub mod spec;
pub mod version;

pub use identity::ClusterIdentity;
pub use identity::SecretRef;
pub use role::RoleKind;
pub use spec::ClusterSpec;
pub use version::RunningVersionSet;
pub use version::SoftwareVersion;
