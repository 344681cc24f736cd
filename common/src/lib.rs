// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities shared by the storage cluster operator crates.
//!
//! Nothing in here knows about clusters: this crate provides the retry
//! policies used when waiting on the platform, and the process-execution
//! capability used to run short-lived commands inside software images.

pub mod backoff;
pub mod process;
