// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors from a whole orchestration pass

use crate::facilities::IdentityStoreError;
use crate::sequencer::SequenceError;
use crate::upgrade_gate::GateError;
use crate::version_probe::ProbeError;
use slog_error_chain::SlogInlineError;
use std::fmt;

/// The step of a pass that an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassPhase {
    VersionProbe,
    UpgradeGate,
    ConfigPlaceholder,
    Monitors,
    Identity,
    Managers,
    StorageNodes,
    Mirroring,
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PassPhase::VersionProbe => "version probe",
            PassPhase::UpgradeGate => "upgrade gate",
            PassPhase::ConfigPlaceholder => "configuration placeholder",
            PassPhase::Monitors => "monitors",
            PassPhase::Identity => "cluster identity",
            PassPhase::Managers => "managers",
            PassPhase::StorageNodes => "storage nodes",
            PassPhase::Mirroring => "mirroring agents",
        })
    }
}

#[derive(Debug, thiserror::Error, SlogInlineError)]
pub enum PassError {
    #[error("{} phase failed", PassPhase::VersionProbe)]
    Probe(#[source] ProbeError),

    #[error("{} phase failed: could not load cluster identity", PassPhase::UpgradeGate)]
    IdentityLoad(#[source] IdentityStoreError),

    #[error("{} phase failed", PassPhase::UpgradeGate)]
    Gate(#[source] GateError),

    #[error("{} phase failed", .0.phase())]
    Sequence(#[source] SequenceError),
}

impl PassError {
    pub fn phase(&self) -> PassPhase {
        match self {
            PassError::Probe(_) => PassPhase::VersionProbe,
            PassError::IdentityLoad(_) | PassError::Gate(_) => {
                PassPhase::UpgradeGate
            }
            PassError::Sequence(err) => err.phase(),
        }
    }

    /// The pass cannot succeed until someone changes the spec or repairs the
    /// cluster.
    pub fn is_fatal_retriable(&self) -> bool {
        match self {
            PassError::Gate(err) => err.is_fatal_retriable(),
            _ => false,
        }
    }
}
