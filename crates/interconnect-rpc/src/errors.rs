//! Service errors and client-side failures.

use serde_json::{Value, json};

// ── Error code constants ────────────────────────────────────────────

/// Unexpected failure, or nothing usable came back.
pub const INTERNAL_SERVER_ERROR: &str = "internal_server_error";
/// The request body could not be accepted at all.
pub const NOT_ACCEPTABLE: &str = "not_acceptable";
/// The request body had the wrong shape.
pub const VALIDATION_ERROR: &str = "validation_error";
/// The named entity does not exist.
pub const NOT_FOUND: &str = "not_found";

/// Wire discriminator of a service error body.
pub const ERROR_TYPENAME: &str = "error";

/// An error raised by the service, with an HTTP-like status.
///
/// On the wire: `{"__typename":"error","status":..,"code":..,"message":..,"details"?:..}`.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{code} ({status}): {message}")]
pub struct ServiceError {
    /// HTTP-like status; below 500 means the caller's fault.
    pub status: u16,
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Extra structured context.
    pub details: Option<Value>,
}

impl ServiceError {
    /// Build an error.
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 500 `internal_server_error`.
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(500, INTERNAL_SERVER_ERROR, message)
    }

    /// 406 `not_acceptable`.
    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self::new(406, NOT_ACCEPTABLE, message)
    }

    /// 406 `validation_error` listing what was wrong with `entity`.
    pub fn validation_error(entity: &str, errors: impl serde::Serialize) -> Self {
        Self::new(406, VALIDATION_ERROR, format!("Invalid {entity}"))
            .with_details(json!({ "entity": entity, "errors": errors }))
    }

    /// 404 `not_found` for `entity`.
    pub fn not_found(entity: &str) -> Self {
        Self::new(404, NOT_FOUND, format!("The requested {entity} could not be found"))
            .with_details(json!({ "entity": entity }))
    }

    /// Whether retrying cannot help.
    pub fn is_client_error(&self) -> bool {
        self.status < 500
    }

    /// Wire form.
    pub fn to_response(&self) -> Value {
        let mut body = json!({
            "__typename": ERROR_TYPENAME,
            "status": self.status,
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = &self.details {
            body["details"] = details.clone();
        }
        body
    }

    /// Decode a wire body, tolerating missing members.
    ///
    /// `fallback_status` is used when the body carries no usable status,
    /// e.g. the HTTP status of the response it arrived in.
    pub fn from_response(body: &Value, fallback_status: u16) -> Self {
        let status = body
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(fallback_status);
        let code = body
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or(INTERNAL_SERVER_ERROR);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| format!("Request failed with status {status}"), str::to_string);
        Self {
            status,
            code: code.to_string(),
            message,
            details: body.get("details").cloned(),
        }
    }

    /// Whether `body` is a top-level error envelope.
    pub fn is_error_body(body: &Value) -> bool {
        body.get("__typename").and_then(Value::as_str) == Some(ERROR_TYPENAME)
    }
}

/// Failure to exchange a batch with the service at all.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// Connection, TLS or I/O failure.
    #[error("request failed: {0}")]
    Request(String),
    /// No response within the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// A 2xx response whose body is not a batch reply.
    #[error("malformed batch response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Why one attempt of one call failed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The service answered with an error.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The batch never got a usable answer.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Whether another attempt may succeed.
    ///
    /// Service errors below 500 are deterministic; everything else,
    /// including failures with no status at all, is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Service(e) => !e.is_client_error(),
            Self::Transport(_) => true,
        }
    }
}
