//! Caller-facing engine: one instance per connection.
//!
//! [`OrchflowClient`] ties the connection manager, request tracker, event
//! dispatcher and listener task together. All methods take `&self`, so one
//! client can be shared across tasks behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::actions::{Action, EXECUTE_METHOD, SUBSCRIBE_METHOD};
use crate::codec;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatcher::{EventDispatcher, EventHandler, HandlerId};
use crate::errors::{ClientError, Result};
use crate::listener::{ListenerExit, run_listener};
use crate::tracker::RequestTracker;

/// Listener task outcome; `None` if the task itself failed.
type ListenerDone = Shared<BoxFuture<'static, Option<ListenerExit>>>;

/// A connected protocol engine.
pub struct OrchflowClient {
    connection: Arc<ConnectionManager>,
    tracker: Arc<RequestTracker>,
    dispatcher: Arc<EventDispatcher>,
    listener: ListenerDone,
    call_timeout: Option<Duration>,
}

impl OrchflowClient {
    /// Connect to `url` with default settings.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(ClientConfig::with_url(url)).await
    }

    /// Connect using `config` and start the listener loop.
    pub async fn connect_with(config: ClientConfig) -> Result<Self> {
        let connection = Arc::new(ConnectionManager::new(&config));
        let frames = connection.connect().await?;

        let tracker = Arc::new(RequestTracker::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let listener = tokio::spawn(run_listener(
            frames,
            Arc::clone(&connection),
            Arc::clone(&tracker),
            Arc::clone(&dispatcher),
        ))
        .map(|joined| match joined {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!(error = %e, "listener task failed");
                None
            }
        })
        .boxed()
        .shared();

        Ok(Self {
            connection,
            tracker,
            dispatcher,
            listener,
            call_timeout: config.call_timeout(),
        })
    }

    /// Invoke `method` and wait for its result.
    ///
    /// Uses the configured call deadline, if any; otherwise waits until the
    /// orchestrator answers or the connection ends.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_inner(method, params, self.call_timeout).await
    }

    /// Invoke `method` with an explicit deadline.
    ///
    /// On expiry the call is withdrawn; a late response is discarded.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.call_inner(method, params, Some(timeout)).await
    }

    /// Run an orchestrator action through the `execute` method.
    pub async fn execute(&self, action: &Action) -> Result<Value> {
        debug!(action = action.kind(), "executing action");
        let params = json!({ "action": serde_json::to_value(action)? });
        self.call(EXECUTE_METHOD, params).await
    }

    /// Ask the orchestrator to push the given event types.
    ///
    /// Fire-and-forget: no id is attached and no acknowledgement is awaited.
    pub async fn subscribe<I, S>(&self, event_types: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let events: Vec<String> = event_types
            .into_iter()
            .map(|e| e.as_ref().to_owned())
            .collect();
        let frame = codec::encode_notification(SUBSCRIBE_METHOD, &json!({ "events": events }))?;
        self.connection.send(frame).await?;
        info!(events = ?events, "subscribed");
        Ok(())
    }

    /// Register `handler` for `event_type`. Handlers run in registration order.
    pub fn on_event<H: EventHandler>(&self, event_type: &str, handler: H) -> HandlerId {
        self.dispatcher.on_event(event_type, handler)
    }

    /// Remove a handler registration.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.dispatcher.remove(id)
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Calls still awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.tracker.pending_count()
    }

    /// Close the connection and wait for the listener to stop.
    ///
    /// Every outstanding call fails with [`ClientError::ConnectionClosed`].
    /// Idempotent.
    pub async fn close(&self) {
        self.connection.close();
        let _ = self.tracker.fail_all("closed by client");
        if let Some(exit) = self.listener.clone().await {
            debug!(%exit, "listener joined");
        }
    }

    /// Wait until the listener stops, whether on its own (remote close or
    /// transport loss) or through [`close`](Self::close).
    ///
    /// May be awaited any number of times, and abandoning the wait does not
    /// affect a later `close`. Returns `None` only if the listener task failed.
    pub async fn closed(&self) -> Option<ListenerExit> {
        self.listener.clone().await
    }

    async fn call_inner(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        // Every early return drops `pending`, which withdraws the call.
        let pending = self.tracker.issue(method)?;
        let id = pending.id();

        let frame = codec::encode_request(id, method, &params)?;
        self.connection.send(frame).await?;
        debug!(id, method, "call sent");

        let Some(limit) = timeout else {
            return pending.await;
        };
        if let Ok(outcome) = tokio::time::timeout(limit, pending).await {
            outcome
        } else {
            let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            warn!(id, method, timeout_ms, "call timed out");
            Err(ClientError::Timeout {
                method: method.to_owned(),
                id,
                timeout_ms,
            })
        }
    }
}

impl Drop for OrchflowClient {
    fn drop(&mut self) {
        self.connection.close();
        let _ = self.tracker.fail_all("closed by client");
    }
}

impl std::fmt::Debug for OrchflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchflowClient")
            .field("url", &self.connection.url())
            .field("state", &self.connection.state())
            .field("pending_calls", &self.tracker.pending_count())
            .finish_non_exhaustive()
    }
}
