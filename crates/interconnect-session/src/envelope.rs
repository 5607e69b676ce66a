//! Wire-level message envelope.
//!
//! Every message carries the protocol tag `"metorialInterconnect": "1.0"` and
//! a `type` discriminator:
//!
//! ```text
//! {"metorialInterconnect":"1.0","type":"request","id":"..","method":"..","params":..}
//! {"metorialInterconnect":"1.0","type":"response","id":"..","result":..}
//! {"metorialInterconnect":"1.0","type":"response","id":"..","error":{"code":..,"message":".."}}
//! {"metorialInterconnect":"1.0","type":"notification","method":"..","params":..}
//! ```
//!
//! Error replies are written as `type: "response"` with an `error` member.
//! `type: "response-error"` is accepted on input.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, StructuredError};

/// Name of the top-level protocol tag.
pub const PROTOCOL_TAG: &str = "metorialInterconnect";

/// Protocol version written on every envelope.
pub const PROTOCOL_VERSION: &str = "1.0";

/// One protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// A call expecting exactly one reply with the same `id`.
    Request {
        /// Correlation ID.
        id: String,
        /// Method name.
        method: String,
        /// Call parameters.
        params: Value,
    },
    /// Successful reply.
    Response {
        /// Correlation ID of the request.
        id: String,
        /// Result payload.
        result: Value,
    },
    /// Failed reply.
    ResponseError {
        /// Correlation ID of the request.
        id: String,
        /// Structured error.
        error: StructuredError,
    },
    /// Fire-and-forget message.
    Notification {
        /// Method name.
        method: String,
        /// Notification parameters.
        params: Value,
    },
}

impl Envelope {
    /// Build a request.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Build a successful reply.
    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self::Response {
            id: id.into(),
            result,
        }
    }

    /// Build an error reply.
    pub fn error(id: impl Into<String>, error: StructuredError) -> Self {
        Self::ResponseError {
            id: id.into(),
            error,
        }
    }

    /// Build a notification.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Correlation ID, absent for notifications.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } | Self::ResponseError { id, .. } => {
                Some(id)
            }
            Self::Notification { .. } => None,
        }
    }

    /// Method name, present for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } | Self::ResponseError { .. } => None,
        }
    }

    /// Short name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::ResponseError { .. } => "response-error",
            Self::Notification { .. } => "notification",
        }
    }

    /// Whether this is a reply (success or error) to the request `id`.
    pub fn is_reply_to(&self, request_id: &str) -> bool {
        match self {
            Self::Response { id, .. } | Self::ResponseError { id, .. } => id == request_id,
            _ => false,
        }
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Value {
        let wire = WireOut::from(self);
        // WireOut only holds strings and JSON values
        serde_json::to_value(wire).unwrap_or(Value::Null)
    }

    /// Serialize to JSON text.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireOut::from(self))
    }

    /// Parse JSON text.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: WireIn = serde_json::from_str(text)?;
        raw.try_into()
    }

    /// Parse an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let raw: WireIn = serde_json::from_value(value)?;
        raw.try_into()
    }
}

#[derive(Serialize)]
struct WireOut<'a> {
    #[serde(rename = "metorialInterconnect")]
    tag: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a StructuredError>,
}

impl<'a> From<&'a Envelope> for WireOut<'a> {
    fn from(envelope: &'a Envelope) -> Self {
        let mut wire = WireOut {
            tag: PROTOCOL_VERSION,
            kind: "response",
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match envelope {
            Envelope::Request { id, method, params } => {
                wire.kind = "request";
                wire.id = Some(id);
                wire.method = Some(method);
                wire.params = Some(params);
            }
            Envelope::Response { id, result } => {
                wire.id = Some(id);
                wire.result = Some(result);
            }
            Envelope::ResponseError { id, error } => {
                wire.id = Some(id);
                wire.error = Some(error);
            }
            Envelope::Notification { method, params } => {
                wire.kind = "notification";
                wire.method = Some(method);
                wire.params = Some(params);
            }
        }
        wire
    }
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(rename = "metorialInterconnect")]
    tag: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, deserialize_with = "present")]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<StructuredError>,
}

/// Distinguishes an explicit `null` (`Some(Null)`) from an absent field (`None`).
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<WireIn> for Envelope {
    type Error = ProtocolError;

    fn try_from(raw: WireIn) -> Result<Self, Self::Error> {
        if raw.tag.split('.').next() != Some("1") {
            return Err(ProtocolError::Version(raw.tag));
        }
        match raw.kind.as_str() {
            "request" => Ok(Self::Request {
                id: raw.id.ok_or(ProtocolError::MissingField {
                    kind: "request",
                    field: "id",
                })?,
                method: raw.method.ok_or(ProtocolError::MissingField {
                    kind: "request",
                    field: "method",
                })?,
                params: raw.params.unwrap_or(Value::Null),
            }),
            "response" | "response-error" => {
                let id = raw.id.ok_or(ProtocolError::MissingField {
                    kind: "response",
                    field: "id",
                })?;
                match raw.error {
                    Some(error) => Ok(Self::ResponseError { id, error }),
                    None if raw.kind == "response-error" => Err(ProtocolError::MissingField {
                        kind: "response-error",
                        field: "error",
                    }),
                    None => Ok(Self::Response {
                        id,
                        result: raw.result.unwrap_or(Value::Null),
                    }),
                }
            }
            "notification" => Ok(Self::Notification {
                method: raw.method.ok_or(ProtocolError::MissingField {
                    kind: "notification",
                    field: "method",
                })?,
                params: raw.params.unwrap_or(Value::Null),
            }),
            _ => Err(ProtocolError::UnknownType(raw.kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn request_wire_form() {
        let env = Envelope::request("abc-1", "servers.get", json!({"id": "srv_1"}));
        assert_eq!(
            env.to_value(),
            json!({
                "metorialInterconnect": "1.0",
                "type": "request",
                "id": "abc-1",
                "method": "servers.get",
                "params": {"id": "srv_1"}
            })
        );
    }

    #[test]
    fn error_reply_is_written_as_response() {
        let env = Envelope::error("abc-1", StructuredError::new(-32601, "Method not found: x"));
        let v = env.to_value();
        assert_eq!(v["type"], "response");
        assert_eq!(v["error"]["code"], -32601);
        assert!(v.get("result").is_none());
    }

    #[test]
    fn null_result_is_kept() {
        let env = Envelope::response("abc-1", Value::Null);
        let text = env.encode().unwrap();
        assert!(text.contains(r#""result":null"#));
        assert_eq!(Envelope::decode(&text).unwrap(), env);
    }

    #[test]
    fn notification_has_no_id() {
        let env = Envelope::notification("system/log", json!(["hi"]));
        let v = env.to_value();
        assert!(v.get("id").is_none());
        assert_eq!(env.id(), None);
        assert_eq!(env.method(), Some("system/log"));
    }

    #[test]
    fn decode_response_error_alias() {
        let text = r#"{"metorialInterconnect":"1.0","type":"response-error","id":"x-1",
                       "error":{"code":409,"message":"conflict","data":{"k":1}}}"#;
        let env = Envelope::decode(text).unwrap();
        assert_matches!(env, Envelope::ResponseError { ref id, ref error }
            if id == "x-1" && error.code == 409 && error.data == Some(json!({"k": 1})));
        assert!(env.is_reply_to("x-1"));
        assert!(!env.is_reply_to("x-2"));
    }

    #[test]
    fn decode_missing_params_defaults_to_null() {
        let text = r#"{"metorialInterconnect":"1.0","type":"request","id":"a","method":"m"}"#;
        assert_matches!(
            Envelope::decode(text).unwrap(),
            Envelope::Request { params: Value::Null, .. }
        );
    }

    #[test]
    fn decode_missing_result_defaults_to_null() {
        let text = r#"{"metorialInterconnect":"1.0","type":"response","id":"a"}"#;
        assert_eq!(
            Envelope::decode(text).unwrap(),
            Envelope::response("a", Value::Null)
        );
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let text = r#"{"metorialInterconnect":"1.0","type":"ping"}"#;
        assert_matches!(Envelope::decode(text), Err(ProtocolError::UnknownType(t)) if t == "ping");
    }

    #[test]
    fn decode_rejects_other_major_version() {
        let text = r#"{"metorialInterconnect":"2.0","type":"notification","method":"m"}"#;
        assert_matches!(Envelope::decode(text), Err(ProtocolError::Version(v)) if v == "2.0");
    }

    #[test]
    fn decode_accepts_minor_version() {
        let text = r#"{"metorialInterconnect":"1.3","type":"notification","method":"m"}"#;
        assert!(Envelope::decode(text).is_ok());
    }

    #[test]
    fn decode_rejects_missing_tag() {
        let text = r#"{"type":"notification","method":"m"}"#;
        assert_matches!(Envelope::decode(text), Err(ProtocolError::Json(_)));
    }

    #[test]
    fn decode_rejects_request_without_id() {
        let text = r#"{"metorialInterconnect":"1.0","type":"request","method":"m"}"#;
        assert_matches!(
            Envelope::decode(text),
            Err(ProtocolError::MissingField { kind: "request", field: "id" })
        );
    }

    #[test]
    fn decode_rejects_response_error_without_error() {
        let text = r#"{"metorialInterconnect":"1.0","type":"response-error","id":"a"}"#;
        assert_matches!(
            Envelope::decode(text),
            Err(ProtocolError::MissingField { field: "error", .. })
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_matches!(Envelope::decode("not json"), Err(ProtocolError::Json(_)));
    }

    #[test]
    fn from_value_matches_decode() {
        let env = Envelope::request("r-9", "run/execute", json!([1, "two", null]));
        assert_eq!(Envelope::from_value(env.to_value()).unwrap(), env);
    }

    #[test]
    fn kinds() {
        assert_eq!(Envelope::request("a", "m", Value::Null).kind(), "request");
        assert_eq!(Envelope::response("a", Value::Null).kind(), "response");
        assert_eq!(
            Envelope::error("a", StructuredError::internal()).kind(),
            "response-error"
        );
        assert_eq!(Envelope::notification("m", Value::Null).kind(), "notification");
    }
}
