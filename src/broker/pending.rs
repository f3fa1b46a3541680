//! Pending results table shared by the collector and dispatch waiters.
//!
//! The collector task is the only writer: it inserts each response under its
//! key. Waiters claim (remove) their own entry, so every response is handed
//! out at most once. Instead of polling, waiters sleep on a `Notify` that the
//! collector triggers after every insert; a waiter still returns only once
//! its key is present.
//!
//! # Lifecycle
//!
//! - `insert()`: collector publishes a response and wakes waiters
//! - `wait_for()`: dispatcher sleeps until its key appears, then claims it
//! - `abandon()`: dispatcher gives up (timeout); a late response is discarded
//! - `close()`: worker gone; waiters without an entry fail immediately

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::envelope::{CallKey, Response};
use crate::error::{BrokerError, LockResultExt};

/// Result of publishing a response into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    /// Stored; the waiter for this key can claim it.
    Stored,
    /// A response for this key was already waiting; the new one was dropped.
    Duplicate,
    /// The waiter gave up on this key; the response was dropped.
    Abandoned,
}

/// Concurrency-safe key → response map with wakeup notification.
pub(crate) struct PendingTable {
    /// All table state behind one mutex; never held across an await.
    state: Mutex<TableState>,
    /// Woken after every insert and on close.
    changed: Notify,
}

struct TableState {
    ready: HashMap<CallKey, Response>,
    /// Keys whose waiter gave up before the response arrived.
    abandoned: HashSet<CallKey>,
    /// Set once when the worker channel is gone.
    closed: Option<String>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                ready: HashMap::new(),
                abandoned: HashSet::new(),
                closed: None,
            }),
            changed: Notify::new(),
        }
    }

    /// Publish a response under its key and wake waiters.
    pub(crate) fn insert(&self, response: Response) -> InsertOutcome {
        let key = response.key();
        let outcome = {
            let mut state = self.state.lock().recover_poison("PendingTable::insert");
            if state.abandoned.remove(&key) {
                InsertOutcome::Abandoned
            } else if state.ready.contains_key(&key) {
                InsertOutcome::Duplicate
            } else {
                state.ready.insert(key, response);
                InsertOutcome::Stored
            }
        };

        if outcome == InsertOutcome::Stored {
            self.changed.notify_waiters();
        }
        outcome
    }

    /// Remove and return the response for `key`, if present.
    pub(crate) fn claim(&self, key: CallKey) -> Option<Response> {
        let mut state = self.state.lock().recover_poison("PendingTable::claim");
        state.ready.remove(&key)
    }

    /// Wait until the response for `key` is present, then claim it.
    ///
    /// Fails with `WorkerUnavailable` once the table is closed and no entry
    /// for `key` is present. A response that arrived before the close is still
    /// handed out.
    pub(crate) async fn wait_for(&self, key: CallKey) -> Result<Response, BrokerError> {
        loop {
            // Register for wakeup before checking, so an insert between the
            // check and the await is not missed.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().recover_poison("PendingTable::wait_for");
                if let Some(response) = state.ready.remove(&key) {
                    return Ok(response);
                }
                if let Some(reason) = &state.closed {
                    return Err(BrokerError::unavailable(reason.clone()));
                }
            }

            notified.await;
        }
    }

    /// Give up on `key`.
    ///
    /// Returns the response if it arrived in the meantime; otherwise remembers
    /// the key so a late response is dropped instead of lingering.
    pub(crate) fn abandon(&self, key: CallKey) -> Option<Response> {
        let mut state = self.state.lock().recover_poison("PendingTable::abandon");
        match state.ready.remove(&key) {
            Some(response) => Some(response),
            None => {
                if state.closed.is_none() {
                    state.abandoned.insert(key);
                }
                None
            }
        }
    }

    /// Mark the worker channel as gone and wake every waiter.
    ///
    /// Only the first reason is kept.
    pub(crate) fn close(&self, reason: impl Into<String>) {
        {
            let mut state = self.state.lock().recover_poison("PendingTable::close");
            if state.closed.is_none() {
                state.closed = Some(reason.into());
            }
            state.abandoned.clear();
        }
        self.changed.notify_waiters();
    }

    pub(crate) fn closed_reason(&self) -> Option<String> {
        let state = self.state.lock().recover_poison("PendingTable::closed_reason");
        state.closed.clone()
    }

    /// Number of responses waiting to be claimed.
    pub(crate) fn len(&self) -> usize {
        let state = self.state.lock().recover_poison("PendingTable::len");
        state.ready.len()
    }

    #[cfg(test)]
    pub(crate) fn abandoned_len(&self) -> usize {
        let state = self.state.lock().recover_poison("PendingTable::abandoned_len");
        state.abandoned.len()
    }
}
