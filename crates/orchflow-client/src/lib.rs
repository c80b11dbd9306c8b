//! Client-side protocol engine for the Orchflow orchestrator.
//!
//! One WebSocket connection carries two kinds of traffic:
//!
//! - **Calls**: JSON-RPC requests correlated to their responses by an
//!   integer id ([`OrchflowClient::call`], [`OrchflowClient::execute`])
//! - **Events**: pushed notifications routed by type to ordered handlers
//!   ([`OrchflowClient::subscribe`], [`OrchflowClient::on_event`])
//!
//! # Architecture
//!
//! - [`codec`]: stateless frame encoding and classification
//! - [`tracker`]: in-flight call table; resolves each call exactly once
//! - [`dispatcher`]: event type → handler list; every invocation is its own task
//! - [`connection`]: socket ownership, writer task, connection state
//! - [`listener`]: the single receive loop routing frames to tracker or dispatcher
//! - [`client`]: the facade tying the above together
//!
//! Transport loss is terminal: outstanding calls fail with
//! [`ClientError::ConnectionClosed`] and a new client must be connected.

#![deny(unsafe_code)]

pub mod actions;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod listener;
pub mod logging;
pub mod tracker;

pub use actions::{Action, PaneType};
pub use client::OrchflowClient;
pub use codec::{Event, Message};
pub use config::{ClientConfig, load_config, load_config_from_path};
pub use connection::ConnectionState;
pub use dispatcher::{EventHandler, HandlerId};
pub use errors::{ClientError, ConfigError, ErrorCode, HandlerError, ProtocolError, Result, RpcError};
pub use listener::ListenerExit;
