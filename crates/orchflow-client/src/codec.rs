//! Wire codec: outgoing JSON-RPC requests and inbound frame classification.
//!
//! Every frame is one JSON object. Inbound frames decode into exactly one
//! [`Message`] variant:
//!
//! - `{"id": n, "result": ...}` → [`Message::Response`]
//! - `{"id": n, "error": {...}}` → [`Message::ErrorResponse`]
//! - `{"event": {"type": "...", ...}}` → [`Message::Event`]
//! - `{"method": "...", "params": {"event": {...}}}` → [`Message::Event`]
//!   (the notification shape the orchestrator emits)
//!
//! The codec holds no state.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{ProtocolError, RpcError};

/// JSON-RPC protocol version stamped on every outgoing request.
pub const JSONRPC_VERSION: &str = "2.0";

// ─────────────────────────────────────────────────────────────────────────────
// Outgoing
// ─────────────────────────────────────────────────────────────────────────────

/// Outgoing request frame.
///
/// `id` is omitted for fire-and-forget requests such as `subscribe`.
#[derive(Clone, Debug, Serialize)]
pub struct Request<'a> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Remote method name.
    pub method: &'a str,
    /// Parameters object.
    pub params: &'a Value,
    /// Correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// Encode a correlated request.
pub fn encode_request(id: u64, method: &str, params: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Request {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
        id: Some(id),
    })
}

/// Encode a fire-and-forget request (no `id`, no response expected).
pub fn encode_notification(method: &str, params: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Request {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
        id: None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Incoming
// ─────────────────────────────────────────────────────────────────────────────

/// A pushed event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Event type used for handler routing (e.g. `pane_output`).
    pub event_type: String,
    /// The full event object, including its `type` member.
    pub payload: Value,
}

impl Event {
    /// Create an event.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Look up a top-level payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Look up a top-level string field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    /// Decode the payload into a typed struct.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// One decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Successful reply to call `id`.
    Response {
        /// Correlation id.
        id: u64,
        /// Result value (`null` when the server omitted it).
        result: Value,
    },
    /// Error reply to call `id`.
    ErrorResponse {
        /// Correlation id.
        id: u64,
        /// Remote error.
        error: RpcError,
    },
    /// Pushed event.
    Event(Event),
}

impl Message {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Response { .. } => "response",
            Self::ErrorResponse { .. } => "error_response",
            Self::Event(_) => "event",
        }
    }
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson {
        reason: e.to_string(),
    })?;
    let Value::Object(mut frame) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    // A correlation id takes precedence over any event tag.
    if let Some(id) = frame.remove("id") {
        return decode_reply(id, frame);
    }
    if let Some(event) = frame.remove("event") {
        return decode_event(event);
    }
    if let Some(Value::String(method)) = frame.remove("method") {
        return decode_notification(method, frame.remove("params"));
    }
    Err(ProtocolError::Unroutable)
}

/// Decode a binary frame; the orchestrator only ever sends UTF-8 JSON.
pub fn decode_binary(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NonUtf8Binary)?;
    decode(text)
}

fn decode_reply(id: Value, mut frame: Map<String, Value>) -> Result<Message, ProtocolError> {
    let id = match id {
        Value::Number(n) => n.as_u64().ok_or_else(|| ProtocolError::InvalidId {
            raw: n.to_string(),
        })?,
        Value::Null => {
            let error = frame.get("error").filter(|e| !e.is_null());
            let message = error
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned);
            return Err(ProtocolError::Uncorrelated {
                is_error: error.is_some(),
                message,
            });
        }
        other => {
            return Err(ProtocolError::InvalidId {
                raw: other.to_string(),
            });
        }
    };

    match frame.remove("error") {
        Some(error) if !error.is_null() => Ok(Message::ErrorResponse {
            id,
            error: RpcError::from_wire(error),
        }),
        _ => Ok(Message::Response {
            id,
            result: frame.remove("result").unwrap_or(Value::Null),
        }),
    }
}

fn decode_event(event: Value) -> Result<Message, ProtocolError> {
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingEventType)?
        .to_owned();
    Ok(Message::Event(Event {
        event_type,
        payload: event,
    }))
}

fn decode_notification(method: String, params: Option<Value>) -> Result<Message, ProtocolError> {
    match params {
        Some(Value::Object(mut params)) => match params.remove("event") {
            Some(event) => decode_event(event),
            None => Ok(Message::Event(Event::new(method, Value::Object(params)))),
        },
        Some(other) => Ok(Message::Event(Event::new(method, other))),
        None => Ok(Message::Event(Event::new(method, Value::Null))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
