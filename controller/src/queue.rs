// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A deduplicating, rate-limited work queue
//!
//! Reconciliation keys flow through here on their way to the workers.  The
//! queue guarantees:
//!
//! - a key queued multiple times before a worker picks it up is delivered
//!   once (duplicates coalesce);
//! - a key is never processed by two workers at the same time: while a key
//!   is checked out, re-adds park in a dirty set and the key is re-queued
//!   when the worker calls [`WorkQueue::done`];
//! - re-enqueues through [`WorkQueue::add_rate_limited`] are delayed by a
//!   per-key exponential backoff, reset by [`WorkQueue::forget`];
//! - shutdown stops intake and lets workers drain what is already queued.

use ballast_common::backoff::retry_policy_enqueue;
use ballast_common::backoff::Backoff;
use ballast_common::backoff::ExponentialBackoff;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Shared handle to a work queue; clones refer to the same queue.
#[derive(Clone)]
pub struct WorkQueue<K> {
    core: Arc<QueueCore<K>>,
}

struct QueueCore<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: BTreeSet<K>,
    processing: BTreeSet<K>,
    limiter: BTreeMap<K, RateLimit>,
    shutting_down: bool,
}

struct RateLimit {
    backoff: ExponentialBackoff,
    requeues: u32,
}

impl RateLimit {
    fn new() -> RateLimit {
        RateLimit { backoff: retry_policy_enqueue(), requeues: 0 }
    }
}

impl<K: Clone + Ord + Send + 'static> WorkQueue<K> {
    pub fn new() -> WorkQueue<K> {
        WorkQueue {
            core: Arc::new(QueueCore {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: BTreeSet::new(),
                    processing: BTreeSet::new(),
                    limiter: BTreeMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Queues a key for processing.  No-op if the key is already waiting.
    pub fn add(&self, key: K) {
        {
            let mut state = self.core.state.lock().unwrap();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                // parked in the dirty set; done() will queue it
                return;
            }
            state.queue.push_back(key);
        }
        self.core.notify.notify_one();
    }

    /// Queues a key after the given delay.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Queues a key after its per-key backoff delay, counting the requeue.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.core.state.lock().unwrap();
            if state.shutting_down {
                return;
            }
            let limit = state
                .limiter
                .entry(key.clone())
                .or_insert_with(RateLimit::new);
            limit.requeues += 1;
            let max = limit.backoff.max_interval;
            limit.backoff.next_backoff().unwrap_or(max)
        };
        self.add_after(key, delay);
    }

    /// Returns how many times the key has been re-queued with rate limiting
    /// since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        let state = self.core.state.lock().unwrap();
        state.limiter.get(key).map(|limit| limit.requeues).unwrap_or(0)
    }

    /// Clears the rate-limiting history of a key after a successful pass.
    pub fn forget(&self, key: &K) {
        let mut state = self.core.state.lock().unwrap();
        state.limiter.remove(key);
    }

    /// Checks a key out for exclusive processing.
    ///
    /// Blocks until a key is available.  Returns `None` once the queue has
    /// shut down and drained.  The caller must pair every returned key with
    /// a [`WorkQueue::done`] call.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.core.notify.notified();
            {
                let mut state = self.core.state.lock().unwrap();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    // wake another worker in case more keys are queued
                    if !state.queue.is_empty() {
                        self.core.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Releases a key checked out by [`WorkQueue::get`].  If the key was
    /// re-added while checked out, it goes back on the queue.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.core.state.lock().unwrap();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.core.notify.notify_one();
        }
    }

    /// Stops intake.  Workers drain the remaining keys, then their `get`
    /// calls return `None`.
    pub fn shut_down(&self) {
        {
            let mut state = self.core.state.lock().unwrap();
            state.shutting_down = true;
        }
        self.core.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        let state = self.core.state.lock().unwrap();
        state.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::WorkQueue;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dedup() {
        let queue: WorkQueue<String> = WorkQueue::new();
        queue.add("vol-1".to_string());
        queue.add("vol-1".to_string());
        queue.add("vol-2".to_string());
        assert_eq!(2, queue.len());

        assert_eq!(Some("vol-1".to_string()), queue.get().await);
        assert_eq!(Some("vol-2".to_string()), queue.get().await);
        queue.done(&"vol-1".to_string());
        queue.done(&"vol-2".to_string());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_exclusive_delivery() {
        let queue: WorkQueue<String> = WorkQueue::new();
        queue.add("vol-1".to_string());
        let key = queue.get().await.unwrap();

        // re-adds while the key is checked out park in the dirty set
        queue.add("vol-1".to_string());
        queue.add("vol-1".to_string());
        assert!(queue.is_empty());

        // ... and queue exactly one redelivery on done
        queue.done(&key);
        assert_eq!(1, queue.len());
        assert_eq!(Some("vol-1".to_string()), queue.get().await);
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_requeues() {
        let queue: WorkQueue<String> = WorkQueue::new();
        let key = "vol-1".to_string();
        assert_eq!(0, queue.num_requeues(&key));

        queue.add_rate_limited(key.clone());
        queue.add_rate_limited(key.clone());
        assert_eq!(2, queue.num_requeues(&key));

        // the delayed adds coalesce into a single delivery
        let got = tokio::time::timeout(Duration::from_secs(10), queue.get())
            .await
            .unwrap();
        assert_eq!(Some(key.clone()), got);
        queue.done(&key);

        queue.forget(&key);
        assert_eq!(0, queue.num_requeues(&key));
    }

    #[tokio::test]
    async fn test_shutdown_drains() {
        let queue: WorkQueue<String> = WorkQueue::new();
        queue.add("vol-1".to_string());
        queue.shut_down();

        // intake is closed, but what was queued is still delivered
        queue.add("vol-2".to_string());
        assert_eq!(Some("vol-1".to_string()), queue.get().await);
        queue.done(&"vol-1".to_string());
        assert_eq!(None, queue.get().await);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_blocked_workers() {
        let queue: WorkQueue<String> = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        // give the worker a chance to block on an empty queue
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shut_down();
        let got =
            tokio::time::timeout(Duration::from_secs(10), waiter).await;
        assert_eq!(None, got.unwrap().unwrap());
    }
}
