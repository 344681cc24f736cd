// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retry policies for waiting on the platform, built on exponential backoff.

use std::time::Duration;

pub use ::backoff::backoff::Backoff;
pub use ::backoff::future::retry_notify;
pub use ::backoff::Error as BackoffError;
pub use ::backoff::ExponentialBackoff;

/// Return a backoff policy for waiting on a daemon role's workload to converge
/// on the platform.
///
/// The policy gives up once `max_elapsed` has passed, returning the last
/// transient error to the caller.
pub fn retry_policy_role_readiness(
    max_elapsed: Duration,
) -> ::backoff::ExponentialBackoff {
    const INITIAL_INTERVAL: Duration = Duration::from_millis(250);
    const MAX_INTERVAL: Duration = Duration::from_secs(10);
    let mut policy = policy_with_max(INITIAL_INTERVAL, MAX_INTERVAL);
    policy.max_elapsed_time = Some(max_elapsed);
    policy
}

fn policy_with_max(
    initial_interval: Duration,
    max_interval: Duration,
) -> ::backoff::ExponentialBackoff {
    let current_interval = initial_interval;
    ::backoff::ExponentialBackoff {
        current_interval,
        initial_interval,
        multiplier: 2.0,
        max_interval,
        max_elapsed_time: None,
        ..backoff::ExponentialBackoff::default()
    }
}
