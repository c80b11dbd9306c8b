//! In-flight call table keyed by correlation id.
//!
//! Ids start at 1 and increase strictly for the lifetime of one tracker (one
//! connection). Each [`PendingCall`] is resolved exactly once: by a response,
//! by an error response, or by the failure sweep in [`RequestTracker::fail_all`].
//! After the sweep the tracker is closed and refuses new calls. Dropping a
//! [`PendingCall`] before it resolves withdraws it from the table.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::{ClientError, Result, RpcError};

/// Final outcome delivered to a suspended caller.
pub type CallOutcome = Result<Value>;

struct PendingEntry {
    method: String,
    tx: oneshot::Sender<CallOutcome>,
}

struct TrackerState {
    next_id: u64,
    pending: HashMap<u64, PendingEntry>,
    /// Set by the failure sweep; carries the close reason.
    closed: Option<String>,
}

/// Owns the table of outstanding calls.
pub struct RequestTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl RequestTracker {
    /// Create an empty tracker. The first issued id is `1`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                next_id: 1,
                pending: HashMap::new(),
                closed: None,
            })),
        }
    }

    /// Allocate the next id and register a waiter for it.
    ///
    /// Fails with [`ClientError::ConnectionClosed`] once the tracker has been
    /// swept, so no call can slip in after the connection is gone.
    pub fn issue(&self, method: &str) -> Result<PendingCall> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(ClientError::closed(reason.clone()));
        }
        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = oneshot::channel();
        let _ = state.pending.insert(
            id,
            PendingEntry {
                method: method.to_owned(),
                tx,
            },
        );
        debug!(id, method, "issued call");
        Ok(PendingCall {
            id,
            rx,
            table: Arc::downgrade(&self.state),
            settled: false,
        })
    }

    /// Deliver the outcome for `id`.
    ///
    /// Returns `false` (and logs a protocol anomaly) when `id` is unknown or
    /// already resolved. Never fatal.
    pub fn resolve(&self, id: u64, outcome: std::result::Result<Value, RpcError>) -> bool {
        let entry = self.state.lock().pending.remove(&id);
        let Some(entry) = entry else {
            warn!(id, "response for unknown or already resolved call, discarding");
            return false;
        };
        let ok = outcome.is_ok();
        if entry.tx.send(outcome.map_err(ClientError::Rpc)).is_err() {
            debug!(id, method = %entry.method, "caller stopped waiting before resolution");
        } else {
            debug!(id, method = %entry.method, ok, "resolved call");
        }
        true
    }

    /// Remove a call without resolving it.
    ///
    /// A later response for `id` is then treated as unknown.
    pub fn withdraw(&self, id: u64) -> bool {
        withdraw_from(&self.state, id)
    }

    /// Fail every outstanding call with [`ClientError::ConnectionClosed`] and
    /// close the tracker. Returns how many calls were failed.
    ///
    /// Idempotent: later sweeps find nothing to fail and keep the first reason.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingEntry)> = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_owned());
            }
            state.pending.drain().collect()
        };
        let count = drained.len();
        for (id, entry) in drained {
            debug!(id, method = %entry.method, "failing call on connection loss");
            let _ = entry.tx.send(Err(ClientError::closed(reason)));
        }
        count
    }

    /// Whether the failure sweep has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    /// Number of outstanding calls.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Outstanding ids in ascending order.
    pub fn pending_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.state.lock().pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PendingCall
// ─────────────────────────────────────────────────────────────────────────────

fn withdraw_from(state: &Mutex<TrackerState>, id: u64) -> bool {
    let removed = state.lock().pending.remove(&id);
    if let Some(entry) = &removed {
        debug!(id, method = %entry.method, "withdrew call");
    }
    removed.is_some()
}

/// Handle a caller suspends on until its call resolves.
///
/// Dropping it unresolved (a caller-side timeout, a lost `select!` branch)
/// withdraws the call, so abandoned calls do not accumulate.
#[must_use = "a pending call does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<CallOutcome>,
    table: Weak<Mutex<TrackerState>>,
    settled: bool,
}

impl PendingCall {
    /// Correlation id of this call.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingCall {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let received = std::task::ready!(Pin::new(&mut self.rx).poll(cx));
        self.settled = true;
        Poll::Ready(received.unwrap_or(Err(ClientError::ConnectionClosed { reason: None })))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Ids are never reused, so this is a no-op if the call already resolved.
        if let Some(table) = self.table.upgrade() {
            let _ = withdraw_from(&table, self.id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
