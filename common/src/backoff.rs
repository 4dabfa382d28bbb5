// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module providing utilities for retrying operations with exponential
//! backoff.
//!
//! These retry policies should be used when attempting to access some
//! loosely-coupled component which may transiently fail due to:
//! - A service which is still asynchronously initializing
//! - An inaccessible network
//! - An overloaded server

use std::time::Duration;

pub use ::backoff::backoff::Backoff;
pub use ::backoff::future::{retry, retry_notify};
pub use ::backoff::Error as BackoffError;
pub use ::backoff::{ExponentialBackoff, ExponentialBackoffBuilder, Notify};

/// Return a backoff policy for re-enqueueing keys into a reconciliation work
/// queue.
///
/// The first retries land almost immediately so that a transiently failing
/// reconciliation converges quickly, while a persistently failing key backs
/// off far enough to stop dominating the queue.
pub fn retry_policy_enqueue() -> ::backoff::ExponentialBackoff {
    backoff_builder()
        .with_initial_interval(Duration::from_millis(5))
        .with_max_interval(Duration::from_secs(1000))
        .build()
}

/// Return a backoff policy for querying internal services.
///
/// This policy makes attempts to retry under one second, but backs off
/// significantly to avoid overloading critical services.
pub fn retry_policy_internal_service() -> ::backoff::ExponentialBackoff {
    backoff_builder()
        .with_initial_interval(Duration::from_millis(250))
        .with_max_interval(Duration::from_secs(60 * 60))
        .build()
}

fn backoff_builder() -> ::backoff::ExponentialBackoffBuilder {
    let mut builder = ::backoff::ExponentialBackoffBuilder::new();
    builder.with_multiplier(2.0).with_max_elapsed_time(None);
    builder
}
