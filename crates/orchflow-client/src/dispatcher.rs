//! Event routing: event type → ordered handler list.
//!
//! Every handler invocation runs as its own tokio task. Handlers for one
//! event are started in registration order; a handler that fails, panics,
//! or never finishes does not affect its siblings or the listener loop.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::Event;
use crate::errors::HandlerError;

/// Handle returned by registration; used to remove that one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Something that reacts to a pushed event.
///
/// Implemented for every `Fn(Event) -> impl Future<Output = Result<(), HandlerError>>`,
/// so closures returning `async move { ... }` blocks register directly.
/// Each call to `handle`, including any synchronous work before the future is
/// returned, happens on a task of its own.
pub trait EventHandler: Send + Sync + 'static {
    /// Start handling `event`.
    fn handle(&self, event: Event) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle(&self, event: Event) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(self(event))
    }
}

type Registration = (HandlerId, Arc<dyn EventHandler>);

/// Owns the event type → handlers table.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append `handler` to the list for `event_type`.
    pub fn on_event<H: EventHandler>(&self, event_type: &str, handler: H) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        self.handlers
            .write()
            .entry(event_type.to_owned())
            .or_default()
            .push((id, handler));
        debug!(event_type, handler = %id, "registered event handler");
        id
    }

    /// Remove one registration. Other handlers keep their relative order.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|(hid, _)| *hid != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Number of handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Start every handler registered for the event's type.
    ///
    /// Tasks are spawned in registration order and the call returns without
    /// running any handler code. Returns the spawned tasks; an event type with
    /// no handlers is a no-op. Must be called from within a tokio runtime.
    pub fn dispatch(&self, event: &Event) -> Vec<JoinHandle<()>> {
        // Snapshot so no lock is held while handlers run.
        let targets: Vec<Registration> = match self.handlers.read().get(&event.event_type) {
            Some(list) => list.clone(),
            None => {
                debug!(event_type = %event.event_type, "no handlers for event");
                return Vec::new();
            }
        };

        let mut tasks = Vec::with_capacity(targets.len());
        for (id, handler) in targets {
            let event = event.clone();
            tasks.push(tokio::spawn(async move {
                let event_type = event.event_type.clone();
                // `handle` itself runs here so a blocking or panicking body
                // stays inside this task.
                let invocation = AssertUnwindSafe(async move { handler.handle(event).await });
                let outcome = match invocation.catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(HandlerError::from_panic(panic.as_ref())),
                };
                if let Err(err) = outcome {
                    report(&event_type, id, &err);
                }
            }));
        }
        tasks
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn report(event_type: &str, id: HandlerId, err: &HandlerError) {
    warn!(event_type, handler = %id, error = %err, "event handler failed");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
