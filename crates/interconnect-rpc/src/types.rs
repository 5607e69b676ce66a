//! Call requests and the batch wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One logical call as issued by an SDK client.
///
/// Header and query entries set to `None` are unset; they are stripped
/// before the call is sent and never reach the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct CallRequest {
    /// Handler name, e.g. `servers:get`.
    pub name: String,
    /// Call input.
    pub payload: Value,
    /// Batch endpoint URL.
    pub endpoint: String,
    /// Request headers.
    pub headers: BTreeMap<String, Option<String>>,
    /// Query string parameters.
    pub query: BTreeMap<String, Option<String>>,
}

impl CallRequest {
    /// Call `name` on `endpoint` with no headers or query.
    pub fn new(endpoint: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            endpoint: endpoint.into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
        }
    }

    /// Set a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(name.into(), Some(value.into()));
        self
    }

    /// Set a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.query.insert(name.into(), Some(value.into()));
        self
    }

    /// Drop every unset header and query entry.
    pub fn strip_unset(&mut self) {
        self.headers.retain(|_, v| v.is_some());
        self.query.retain(|_, v| v.is_some());
    }

    /// Headers that are set, in name order.
    pub fn set_headers(&self) -> Vec<(String, String)> {
        set_entries(&self.headers)
    }

    /// Query parameters that are set, in name order.
    pub fn set_query(&self) -> Vec<(String, String)> {
        set_entries(&self.query)
    }
}

fn set_entries(map: &BTreeMap<String, Option<String>>) -> Vec<(String, String)> {
    map.iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
        .collect()
}

/// One call inside a batch request body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Correlation ID, unique among outstanding calls.
    pub id: String,
    /// Handler name.
    pub name: String,
    /// Call input.
    #[serde(default)]
    pub payload: Value,
}

/// Body of a batch POST.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchBody {
    /// Calls, sorted by name on the client side.
    pub calls: Vec<Call>,
}

/// One call's slice of a batch response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    /// ID of the call this answers.
    pub id: String,
    /// HTTP-like status of this call.
    pub status: u16,
    /// Result on 2xx, the service error's wire form otherwise.
    #[serde(default)]
    pub result: Value,
}

impl CallOutcome {
    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A successful call's result.
#[derive(Clone, Debug, PartialEq)]
pub struct CallResponse {
    /// Decoded result.
    pub data: Value,
    /// The call's own status.
    pub status: u16,
    /// Headers of the batch response carrying this call.
    pub headers: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strip_unset_drops_none_entries() {
        let mut req = CallRequest::new("http://api/rpc", "servers:get", json!({}))
            .header("authorization", "Bearer t")
            .query("org", "o_1");
        let _ = req.headers.insert("x-trace".into(), None);
        let _ = req.query.insert("page".into(), None);

        assert_eq!(req.set_headers().len(), 1);
        req.strip_unset();
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.query.len(), 1);
        assert_eq!(req.set_query(), vec![("org".to_string(), "o_1".to_string())]);
    }

    #[test]
    fn call_payload_defaults_to_null() {
        let call: Call = serde_json::from_value(json!({"id": "c1", "name": "a"})).unwrap();
        assert_eq!(call.payload, Value::Null);
    }

    #[test]
    fn outcome_success_range() {
        let ok = CallOutcome {
            id: "c".into(),
            status: 204,
            result: Value::Null,
        };
        let err = CallOutcome { status: 300, ..ok.clone() };
        assert!(ok.is_success());
        assert!(!err.is_success());
    }
}
