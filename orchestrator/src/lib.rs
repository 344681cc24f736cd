// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconciles the desired spec of a storage cluster against the live cluster
//!
//! A [`ClusterOrchestrator`] owns one cluster.  Each orchestration pass:
//!
//! - probes the desired image for the version it contains
//!   ([`version_probe`]),
//! - decides whether moving the cluster to that version is safe
//!   ([`upgrade_gate`]),
//! - starts the daemon roles in order ([`sequencer`]),
//! - and tells child controllers about the result ([`notifier`]).
//!
//! Passes are admitted by an [`scheduler::OrchestrationScheduler`], which
//! keeps them from overlapping and coalesces requests made while one runs.
//! Everything platform-specific sits behind the traits in [`facilities`].

pub mod cluster;
pub mod config;
pub mod error;
pub mod facilities;
pub mod ledger;
pub mod notifier;
pub mod roles;
pub mod scheduler;
pub mod sequencer;
pub mod spec_diff;
pub mod status;
pub mod upgrade_gate;
pub mod version_probe;

#[cfg(any(test, feature = "testing"))]
pub mod fakes;

pub use cluster::ClusterOrchestrator;
pub use cluster::OrchestrationOutcome;
pub use cluster::PassSummary;
pub use config::Config;
pub use error::PassError;
pub use error::PassPhase;
pub use facilities::Facilities;
