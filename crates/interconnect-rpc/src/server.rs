//! Receiving end of the batch protocol.
//!
//! A [`BatchRouter`] maps call names to [`CallHandler`]s and serves them as
//! an axum router: `POST <path>` runs a batch, `GET /ping` answers `OK`.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::FutureExt;
use futures::future::join_all;
use interconnect_core::IdSequence;
use interconnect_session::{Shape, Validator};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::errors::ServiceError;
use crate::types::{BatchBody, Call, CallOutcome};

/// Content type of a successful batch response.
pub const RPC_CONTENT_TYPE: &str = "application/rpc+json";
/// Header carrying the server-assigned request ID.
pub const REQUEST_ID_HEADER: &str = "x-req-id";

/// Runs one named call.
#[async_trait]
pub trait CallHandler: Send + Sync {
    /// Produce the call's result, or a service error carrying its status.
    async fn call(&self, payload: Value) -> Result<Value, ServiceError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CallHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
{
    async fn call(&self, payload: Value) -> Result<Value, ServiceError> {
        (self.0)(payload).await
    }
}

/// Named call handlers served over HTTP.
#[derive(Clone)]
pub struct BatchRouter {
    handlers: HashMap<String, Arc<dyn CallHandler>>,
    ids: Arc<IdSequence>,
}

impl Default for BatchRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRouter {
    /// Router with no handlers; request IDs look like `req_<root>_<n>`.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            ids: Arc::new(IdSequence::prefixed("req", '_')),
        }
    }

    /// Register a closure under `name`. A later registration replaces it.
    #[must_use]
    pub fn handler<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)))
    }

    /// Register a handler object under `name`.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn CallHandler>) -> Self {
        let _ = self.handlers.insert(name.into(), handler);
        self
    }

    /// Registered call names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Axum router serving batches at `path`.
    pub fn into_router(self, path: &str) -> Router {
        Router::new()
            .route(path, post(batch_handler))
            .route("/ping", get(ping_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(self))
    }

    /// Run a raw batch body, returning the HTTP status and response body.
    ///
    /// A body that is not JSON, or not `{calls:[{id,name,payload}]}`, is
    /// refused with 406. If any call names an unknown handler, nothing runs
    /// and the whole batch is answered 404. Otherwise every call runs
    /// concurrently and the status is the highest of 200 and all call
    /// statuses.
    pub async fn run(&self, body: &[u8]) -> (u16, Value) {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "batch body is not JSON");
                return (406, ServiceError::not_acceptable("Invalid JSON").to_response());
            }
        };
        if let Err(issues) = batch_shape().validate(&value) {
            let err = ServiceError::validation_error("request_data", &issues);
            return (err.status, err.to_response());
        }
        let batch: BatchBody = match serde_json::from_value(value) {
            Ok(batch) => batch,
            Err(e) => {
                let err = ServiceError::validation_error("request_data", [e.to_string()]);
                return (err.status, err.to_response());
            }
        };

        if let Some(unknown) = batch
            .calls
            .iter()
            .find(|c| !self.handlers.contains_key(&c.name))
        {
            debug!(name = %unknown.name, "batch names an unknown handler");
            let err = ServiceError::not_found("handler");
            return (err.status, err.to_response());
        }

        let outcomes = join_all(batch.calls.into_iter().map(|call| self.run_call(call))).await;
        let status = outcomes.iter().map(|o| o.status).fold(200, u16::max);
        (
            status,
            json!({ "__typename": "rpc.response", "calls": outcomes }),
        )
    }

    async fn run_call(&self, call: Call) -> CallOutcome {
        let Call { id, name, payload } = call;
        let Some(handler) = self.handlers.get(&name) else {
            let err = ServiceError::not_found("handler");
            return CallOutcome {
                id,
                status: err.status,
                result: err.to_response(),
            };
        };

        let err = match AssertUnwindSafe(handler.call(payload)).catch_unwind().await {
            Ok(Ok(result)) => {
                return CallOutcome {
                    id,
                    status: 200,
                    result,
                };
            }
            Ok(Err(err)) => {
                if !err.is_client_error() {
                    error!(call = %name, %id, error = %err, "call failed");
                }
                err
            }
            Err(_) => {
                error!(call = %name, %id, "call handler panicked");
                ServiceError::internal_server_error("Internal server error")
            }
        };
        CallOutcome {
            id,
            status: err.status,
            result: err.to_response(),
        }
    }
}

impl std::fmt::Debug for BatchRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRouter")
            .field("handlers", &self.names())
            .finish_non_exhaustive()
    }
}

fn batch_shape() -> Shape {
    let call = Shape::object()
        .required("id", Shape::String)
        .required("name", Shape::String)
        .optional("payload", Shape::Any)
        .build();
    Shape::object()
        .required("calls", Shape::array(call))
        .build()
}

/// POST <path>
async fn batch_handler(State(router): State<Arc<BatchRouter>>, body: Bytes) -> Response {
    let request_id = router.ids.next_id();
    let (status, body) = router.run(&body).await;
    let content_type = if ServiceError::is_error_body(&body) {
        "application/json"
    } else {
        RPC_CONTENT_TYPE
    };
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [
            (HeaderName::from_static(REQUEST_ID_HEADER), request_id),
            (header::CONTENT_TYPE, content_type.to_string()),
        ],
        body.to_string(),
    )
        .into_response()
}

/// GET /ping
async fn ping_handler() -> &'static str {
    "OK"
}
