// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Admission control for orchestration passes
//!
//! Any number of callers may ask for a pass at any time.  At most one pass
//! runs at once, and a request that arrives while a pass is running causes
//! exactly one more pass once it finishes: requests made during a pass
//! coalesce.
//!
//! The usual driving loop is:
//!
//! ```text
//! scheduler.request_orchestration();
//! while let Some(claim) = scheduler.try_claim() {
//!     run_one_pass();
//!     drop(claim);
//! }
//! ```
//!
//! If another caller holds the claim, the loop exits immediately; the request
//! it made stays recorded and is picked up by whoever holds the claim when
//! that caller next calls `try_claim()`.

use std::sync::Mutex;

/// The two flags of the coalescing state machine.  Only ever read or written
/// with the scheduler's lock held.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrchestrationState {
    /// A pass has been requested and not yet started.
    pub needed: bool,
    /// A pass is in progress.
    pub running: bool,
}

#[derive(Debug, Default)]
pub struct OrchestrationScheduler {
    state: Mutex<OrchestrationState>,
}

impl OrchestrationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a pass is wanted.
    pub fn request_orchestration(&self) {
        self.state.lock().unwrap().needed = true;
    }

    /// Claims the right to run the next pass, if one is wanted and none is
    /// running.  The claim is given back when the returned guard is dropped.
    pub fn try_claim(&self) -> Option<PassClaim<'_>> {
        let mut state = self.state.lock().unwrap();
        if state.needed && !state.running {
            state.needed = false;
            state.running = true;
            Some(PassClaim { scheduler: self })
        } else {
            None
        }
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> OrchestrationState {
        *self.state.lock().unwrap()
    }

    fn release(&self) {
        self.state.lock().unwrap().running = false;
    }
}

/// Proof that the holder is running the only pass.
///
/// Releasing on drop means a pass that panics or returns early still lets
/// the next one run.
#[must_use = "dropping the claim immediately ends the pass"]
#[derive(Debug)]
pub struct PassClaim<'a> {
    scheduler: &'a OrchestrationScheduler,
}

impl PassClaim<'_> {
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for PassClaim<'_> {
    fn drop(&mut self) {
        self.scheduler.release();
    }
}
