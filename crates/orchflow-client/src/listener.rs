//! The receive loop: one per connection, alive for the connection's lifetime.
//!
//! Each inbound frame is decoded and routed to the [`RequestTracker`] (frames
//! carrying a correlation id) or the [`EventDispatcher`] (events). Bad frames
//! are logged and skipped. When the transport ends or the connection is torn
//! down, every outstanding call is failed and the loop exits.

use std::fmt;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::codec::{self, Message};
use crate::connection::{ConnectionManager, ConnectionState, Inbound};
use crate::dispatcher::EventDispatcher;
use crate::errors::{ProtocolError, Result};
use crate::tracker::RequestTracker;

/// Why the listener loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerExit {
    /// The connection was torn down locally (`close()`, drop, or a writer failure).
    Cancelled {
        /// Whether the caller closed it, as opposed to a write failure.
        by_client: bool,
    },
    /// The remote sent a close frame.
    RemoteClosed {
        /// Close code and reason, if given.
        reason: Option<String>,
    },
    /// The frame stream ended without a close frame.
    StreamEnded,
    /// Reading from the transport failed.
    TransportError(String),
}

impl fmt::Display for ListenerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled { by_client: true } => f.write_str("closed by client"),
            Self::Cancelled { by_client: false } => f.write_str("connection lost"),
            Self::RemoteClosed { reason: Some(r) } => write!(f, "closed by remote: {r}"),
            Self::RemoteClosed { reason: None } => f.write_str("closed by remote"),
            Self::StreamEnded => f.write_str("connection lost: stream ended"),
            Self::TransportError(e) => write!(f, "connection lost: {e}"),
        }
    }
}

/// Receive, classify and route frames until the connection ends.
///
/// On exit the connection is marked failed (unless it was closed locally)
/// and the tracker's failure sweep has run.
pub async fn run_listener<S>(
    mut frames: S,
    connection: Arc<ConnectionManager>,
    tracker: Arc<RequestTracker>,
    dispatcher: Arc<EventDispatcher>,
) -> ListenerExit
where
    S: Stream<Item = Result<Inbound>> + Unpin,
{
    let cancel = connection.cancellation();
    debug!(url = %connection.url(), "listener started");

    let exit = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                break ListenerExit::Cancelled {
                    by_client: connection.state() == ConnectionState::Closed,
                };
            }
            next = frames.next() => next,
        };

        match next {
            Some(Ok(Inbound::Text(text))) => route(codec::decode(&text), &tracker, &dispatcher),
            Some(Ok(Inbound::Binary(bytes))) => {
                route(codec::decode_binary(&bytes), &tracker, &dispatcher);
            }
            Some(Ok(Inbound::Close { reason })) => break ListenerExit::RemoteClosed { reason },
            Some(Err(e)) => break ListenerExit::TransportError(e.to_string()),
            None => break ListenerExit::StreamEnded,
        }
    };

    let reason = exit.to_string();
    if !matches!(exit, ListenerExit::Cancelled { .. }) {
        connection.mark_failed(&reason);
    }
    let failed = tracker.fail_all(&reason);
    info!(reason = %reason, failed_calls = failed, "listener stopped");
    exit
}

fn route(
    decoded: std::result::Result<Message, ProtocolError>,
    tracker: &RequestTracker,
    dispatcher: &EventDispatcher,
) {
    match decoded {
        Ok(Message::Response { id, result }) => {
            debug!(id, "routing response");
            let _ = tracker.resolve(id, Ok(result));
        }
        Ok(Message::ErrorResponse { id, error }) => {
            debug!(id, code = %error.code, "routing error response");
            let _ = tracker.resolve(id, Err(error));
        }
        Ok(Message::Event(event)) => {
            debug!(event_type = %event.event_type, "routing event");
            let _ = dispatcher.dispatch(&event);
        }
        // Acknowledgements of fire-and-forget requests carry a null id and no error.
        Err(ProtocolError::Uncorrelated { is_error: false, .. }) => {
            debug!("ignoring uncorrelated acknowledgement");
        }
        Err(err) => warn!(error = %err, "dropping frame"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
