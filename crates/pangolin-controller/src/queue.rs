//! Per-kind work queue with single-flight delivery
//!
//! Watch events and requeues both land here. A key is pending at most once;
//! a key handed to a worker is never handed out again until the worker calls
//! [`WorkQueue::done`]. Enqueues that arrive while a key is in flight are
//! coalesced and delivered once afterwards.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct State<K> {
    pending: VecDeque<K>,
    queued: HashSet<K>,
    active: HashSet<K>,
    dirty: HashSet<K>,
    shutdown: bool,
}

/// Deduplicating queue of object keys
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash,
{
    /// Empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                queued: HashSet::new(),
                active: HashSet::new(),
                dirty: HashSet::new(),
                shutdown: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Add a key. No-op if it is already pending; deferred until `done` if it
    /// is in flight.
    pub fn enqueue(&self, key: K) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.pending.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Next key to process; `None` once the queue is shut down
    pub async fn dequeue(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    state.active.insert(key.clone());
                    let more = !state.pending.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a dequeued key as finished, re-queueing it if it was enqueued
    /// while in flight
    pub fn done(&self, key: &K) {
        let mut state = self.state.lock();
        state.active.remove(key);
        if state.dirty.remove(key) && !state.shutdown && state.queued.insert(key.clone()) {
            state.pending.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Number of pending keys
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether no key is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.notify.notify_waiters();
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    /// Enqueue `key` after `delay`
    pub fn enqueue_after(self: &Arc<Self>, key: K, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }
}
