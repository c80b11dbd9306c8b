//! Error taxonomy for the protocol engine.
//!
//! - [`ClientError`]: everything a caller of [`crate::OrchflowClient`] can see
//! - [`RpcError`]: an error the orchestrator reported for one specific call
//! - [`ProtocolError`]: a malformed or unroutable inbound frame (logged, never surfaced)
//! - [`HandlerError`]: an event handler failure (logged, never surfaced)
//! - [`ConfigError`]: configuration file loading failures
//!
//! Transport failures escalate: every outstanding call fails with
//! [`ClientError::ConnectionClosed`]. Per-frame and per-handler failures
//! stay local to the listener loop and the handler task respectively.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

// ─────────────────────────────────────────────────────────────────────────────
// ClientError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of a caller-facing operation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not be established or written to.
    #[error("connection error: {context}")]
    Connection {
        /// What went wrong at the transport boundary.
        context: String,
    },

    /// The connection went away while the call was outstanding, or the
    /// engine is already closed/failed.
    #[error("connection closed{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ConnectionClosed {
        /// Why the connection ended, when known.
        reason: Option<String>,
    },

    /// The orchestrator answered the call with an error.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The call was not resolved within its configured deadline.
    #[error("call {method} (id {id}) timed out after {timeout_ms}ms")]
    Timeout {
        /// Method of the withdrawn call.
        method: String,
        /// Correlation id of the withdrawn call.
        id: u64,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// Request parameters could not be encoded as JSON.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    /// Transport-level failure.
    pub fn connection(context: impl Into<String>) -> Self {
        Self::Connection {
            context: context.into(),
        }
    }

    /// Connection closed with a known reason.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: Some(reason.into()),
        }
    }

    /// Whether this error means the engine instance is no longer usable.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ConnectionClosed { .. })
    }

    /// The remote error, if the orchestrator rejected the call.
    #[must_use]
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RpcError
// ─────────────────────────────────────────────────────────────────────────────

/// Error code carried by an error response.
///
/// The orchestrator speaks JSON-RPC 2.0 and sends numeric codes
/// (`-32601`, `-32603`, ...), but string codes are accepted as well.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    /// Numeric JSON-RPC code.
    Numeric(i64),
    /// Symbolic code such as `SESSION_NOT_FOUND`.
    Named(String),
}

/// JSON-RPC 2.0 parse error.
pub const PARSE_ERROR: i64 = -32700;
/// JSON-RPC 2.0 invalid request.
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC 2.0 method not found.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC 2.0 invalid params.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC 2.0 internal error.
pub const INTERNAL_ERROR: i64 = -32603;

impl ErrorCode {
    /// Numeric value, if this is a numeric code.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Numeric(n) => Some(*n),
            Self::Named(_) => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Named(s) => f.write_str(s),
        }
    }
}

/// Error the orchestrator reported for a specific call.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct RpcError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create a new RPC error without details.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Build an error from an arbitrary `error` member of a response.
    ///
    /// Well-formed objects map field by field. Anything else (a bare string,
    /// an object missing `code`) is kept as the message so nothing the
    /// server said is lost.
    #[must_use]
    pub fn from_wire(value: Value) -> Self {
        if let Ok(err) = serde_json::from_value::<RpcError>(value.clone()) {
            return err;
        }
        let message = match &value {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| value.to_string(), str::to_owned),
            other => other.to_string(),
        };
        Self {
            code: ErrorCode::Numeric(INTERNAL_ERROR),
            message,
            data: Some(value),
        }
    }

    /// Whether the orchestrator did not recognize the method.
    #[must_use]
    pub fn is_method_not_found(&self) -> bool {
        self.code.as_i64() == Some(METHOD_NOT_FOUND)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProtocolError
// ─────────────────────────────────────────────────────────────────────────────

/// A frame the listener loop could not decode or route.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame text is not valid JSON.
    #[error("malformed frame: {reason}")]
    MalformedJson {
        /// Parser message.
        reason: String,
    },

    /// Frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// Binary frame that is not UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NonUtf8Binary,

    /// Frame carries neither a correlation id nor an event tag.
    #[error("frame has neither an id nor an event")]
    Unroutable,

    /// The `id` member is present but not an unsigned integer.
    #[error("invalid correlation id: {raw}")]
    InvalidId {
        /// The id as it appeared on the wire.
        raw: String,
    },

    /// A response with `"id": null`, which cannot be matched to a call.
    #[error("uncorrelated response{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Uncorrelated {
        /// Whether the reply carried an `error` member (as opposed to an
        /// acknowledgement).
        is_error: bool,
        /// Error message, if the server attached one.
        message: Option<String>,
    },

    /// An event object without a string `type`.
    #[error("event has no type")]
    MissingEventType,
}

// ─────────────────────────────────────────────────────────────────────────────
// HandlerError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure inside an event handler.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Handler-reported failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigError
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON or has the wrong shape.
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
