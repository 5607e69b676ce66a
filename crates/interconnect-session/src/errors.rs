//! Error taxonomy for the session protocol.
//!
//! | Kind | Type | Crosses the wire |
//! |------|------|------------------|
//! | Declared application error | [`StructuredError`] | verbatim |
//! | Request/response validation | [`SessionError::Validation`], `-32602` replies | verbatim |
//! | Uncaught handler fault | [`HandlerError::Internal`] | redacted to `-32603` |
//! | Timeout / transport / close | [`SessionError`] | never |
//! | Undecodable envelope | [`ProtocolError`] | never |

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::validation::ValidationIssue;

// ── Error codes ─────────────────────────────────────────────────────

/// Inbound text was not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Envelope was well-formed JSON but not a valid message.
pub const INVALID_REQUEST: i64 = -32600;
/// No handler registered for the method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Params failed the method's validator.
pub const INVALID_PARAMS: i64 = -32602;
/// Uncaught handler fault.
pub const INTERNAL_ERROR: i64 = -32603;

/// Message sent in place of the details of an internal fault.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Application-level error with a stable code, carried in `response` envelopes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct StructuredError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StructuredError {
    /// Build an error without details.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach machine-readable details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// `-32601` for a method nobody registered.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// `-32602` carrying every validation issue under `data.errors`.
    pub fn invalid_params(method: &str, issues: &[ValidationIssue]) -> Self {
        let first = issues
            .first()
            .map_or_else(|| "invalid input".to_string(), ToString::to_string);
        Self::new(
            INVALID_PARAMS,
            format!("Invalid params for method {method}: {first}"),
        )
        .with_data(json!({ "errors": issues }))
    }

    /// The redacted `-32603` sent for uncaught handler faults.
    pub fn internal() -> Self {
        Self::new(INTERNAL_ERROR, INTERNAL_ERROR_MESSAGE)
    }

    /// Whether this is the redacted internal error.
    pub fn is_internal(&self) -> bool {
        self.code == INTERNAL_ERROR
    }
}

/// Failure of an outbound [`request`](crate::SessionManager::request) or
/// [`notify`](crate::SessionManager::notify).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No reply arrived within the deadline.
    #[error("request `{method}` timed out after {timeout_ms} ms")]
    Timeout {
        /// Method that was called.
        method: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// The reply payload failed the caller's validator.
    #[error("invalid result for `{method}`: {}", summarize(issues))]
    Validation {
        /// Method that was called.
        method: String,
        /// Field-level failures.
        issues: Vec<ValidationIssue>,
    },

    /// The remote side answered with a `response` carrying an error.
    #[error(transparent)]
    Remote(StructuredError),

    /// The transceiver failed to send.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The connection closed before a reply arrived.
    #[error("connection closed before a reply arrived")]
    Closed,

    /// Params could not be encoded as JSON.
    #[error("failed to encode params: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SessionError {
    /// The remote error, if the peer replied with one.
    pub fn as_remote(&self) -> Option<&StructuredError> {
        match self {
            Self::Remote(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the failure is local and safe to retry by the caller.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::Closed,
            other => Self::Transport(other),
        }
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error returned by request and notification handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Declared error, sent to the caller verbatim.
    #[error(transparent)]
    Structured(#[from] StructuredError),

    /// Unexpected fault. Reported to the fault sink; the caller only sees
    /// the redacted internal error.
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    /// Wrap any displayable error as an internal fault.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// The error to put on the wire.
    pub fn to_wire(&self) -> StructuredError {
        match self {
            Self::Structured(err) => err.clone(),
            Self::Internal(_) => StructuredError::internal(),
        }
    }
}

impl From<SessionError> for HandlerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Remote(remote) => Self::Structured(remote),
            other => Self::internal(other),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err)
    }
}

/// Failure of a transceiver operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The transceiver was closed.
    #[error("transceiver is closed")]
    Closed,

    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// Establishing the connection failed.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// An inbound message could not be decoded into an [`Envelope`](crate::Envelope).
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, or the JSON does not fit the envelope shape.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// The protocol tag names a version this crate does not speak.
    #[error("unsupported protocol version `{0}`")]
    Version(String),

    /// The `type` field is not one of the known message kinds.
    #[error("unknown envelope type `{0}`")]
    UnknownType(String),

    /// A field required by the message kind is absent.
    #[error("`{kind}` envelope is missing `{field}`")]
    MissingField {
        /// Message kind.
        kind: &'static str,
        /// Missing field.
        field: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn structured_error_wire_shape() {
        let err = StructuredError::new(-32000, "deployment unavailable");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v, json!({"code": -32000, "message": "deployment unavailable"}));
    }

    #[test]
    fn structured_error_with_data_roundtrip() {
        let err = StructuredError::new(404, "gone").with_data(json!({"id": "srv_1"}));
        let back: StructuredError =
            serde_json::from_value(serde_json::to_value(&err).unwrap()).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn method_not_found_message() {
        let err = StructuredError::method_not_found("run/execute");
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert_eq!(err.message, "Method not found: run/execute");
    }

    #[test]
    fn invalid_params_lists_issues() {
        let issues = vec![
            ValidationIssue::new("$.id", "expected string"),
            ValidationIssue::new("$.name", "is required"),
        ];
        let err = StructuredError::invalid_params("servers.get", &issues);
        assert_eq!(err.code, INVALID_PARAMS);
        assert_eq!(
            err.message,
            "Invalid params for method servers.get: $.id: expected string"
        );
        let data = err.data.unwrap();
        assert_eq!(data["errors"].as_array().unwrap().len(), 2);
        assert_eq!(data["errors"][1]["path"], "$.name");
    }

    #[test]
    fn internal_handler_error_is_redacted() {
        let err = HandlerError::internal("db password is hunter2");
        let wire = err.to_wire();
        assert_eq!(wire.code, INTERNAL_ERROR);
        assert_eq!(wire.message, INTERNAL_ERROR_MESSAGE);
        assert!(wire.data.is_none());
    }

    #[test]
    fn structured_handler_error_passes_through() {
        let err: HandlerError = StructuredError::new(409, "conflict").into();
        assert_eq!(err.to_wire(), StructuredError::new(409, "conflict"));
    }

    #[test]
    fn transport_closed_maps_to_session_closed() {
        let err: SessionError = TransportError::Closed.into();
        assert_matches!(err, SessionError::Closed);
        let err: SessionError = TransportError::WebSocket("reset".into()).into();
        assert_matches!(err, SessionError::Transport(_));
    }

    #[test]
    fn remote_session_error_becomes_structured_handler_error() {
        let err: HandlerError = SessionError::Remote(StructuredError::new(1, "nope")).into();
        assert_matches!(err, HandlerError::Structured(e) if e.code == 1);
        let err: HandlerError = SessionError::Closed.into();
        assert_matches!(err, HandlerError::Internal(_));
    }

    #[test]
    fn timeout_display() {
        let err = SessionError::Timeout {
            method: "servers.get".into(),
            timeout_ms: 50,
        };
        assert_eq!(err.to_string(), "request `servers.get` timed out after 50 ms");
        assert!(err.is_timeout());
    }
}
