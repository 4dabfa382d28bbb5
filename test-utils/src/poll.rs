// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Quick-and-dirty polling within a test suite

use std::future::Future;
use std::time::Duration;
use std::time::Instant;
use thiserror::Error;

/// Result of one attempt to check a condition (see [`wait_for_condition()`])
#[derive(Debug, Error)]
pub enum CondCheckError<E> {
    /// the condition we're waiting for is not true
    #[error("poll condition not yet ready")]
    NotYet,
    #[error("non-retryable error while polling on condition")]
    Failed(#[from] E),
}

/// Result of [`wait_for_condition()`]
#[derive(Debug, Error)]
pub enum Error<E> {
    /// operation timed out before succeeding or failing permanently
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("non-retryable error while polling on condition: {0}")]
    PermanentError(E),
}

/// Poll the given closure until it succeeds, returns a permanent error, or
/// a given time has expired
///
/// This is intended for situations in the test suite where you've taken some
/// action and want to wait for its effects to be observable _and_ you have
/// no way to directly wait for the observable event.  This approach is
/// generally not applicable for production code; see `ballast_common::backoff`
/// for that.
///
/// Note that `poll_max` is not a bound on how long this function can take.
/// Rather, it's the time beyond which this function will stop trying to
/// check `cond`.
pub async fn wait_for_condition<O, E, Func, Fut>(
    mut cond: Func,
    poll_interval: &Duration,
    poll_max: &Duration,
) -> Result<O, Error<E>>
where
    Func: FnMut() -> Fut,
    Fut: Future<Output = Result<O, CondCheckError<E>>>,
{
    let poll_start = Instant::now();
    loop {
        let duration = Instant::now().duration_since(poll_start);
        if duration > *poll_max {
            return Err(Error::TimedOut(duration));
        }

        let check = cond().await;
        if let Ok(output) = check {
            return Ok(output);
        }

        if let Err(CondCheckError::Failed(e)) = check {
            return Err(Error::PermanentError(e));
        }

        tokio::time::sleep(*poll_interval).await;
    }
}
