// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What a cluster's orchestrator is doing, and how its last pass went

use crate::error::PassPhase;
use chrono::DateTime;
use chrono::Utc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestrationStatus {
    pub current: CurrentStatus,
    pub last: LastResult,
}

impl Default for OrchestrationStatus {
    fn default() -> Self {
        OrchestrationStatus {
            current: CurrentStatus::Idle,
            last: LastResult::NeverCompleted,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CurrentStatus {
    Idle,
    Running {
        iteration: u64,
        started_at: DateTime<Utc>,
        /// Generation of the spec snapshot this pass works from.
        spec_generation: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LastResult {
    NeverCompleted,
    Completed {
        iteration: u64,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        result: PassResult,
    },
}

impl LastResult {
    pub fn result(&self) -> Option<&PassResult> {
        match self {
            LastResult::NeverCompleted => None,
            LastResult::Completed { result, .. } => Some(result),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassResult {
    Succeeded {
        is_upgrade: bool,
    },
    Failed {
        phase: PassPhase,
        /// The full error chain.
        message: String,
        /// Set when the pass cannot succeed until the spec or the cluster
        /// changes.
        retriable: bool,
    },
}
