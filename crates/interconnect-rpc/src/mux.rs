//! Debounced call batching.
//!
//! Calls sharing headers, query and endpoint join one group. Every new call
//! restarts the group's debounce timer; when the timer finally fires, the
//! group is detached and sent as a single POST with its calls sorted by
//! name. The reply is demultiplexed back to each caller by call ID.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use interconnect_settings::BatchSettings;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::{ClientError, ServiceError, TransportError};
use crate::transport::{BatchRequest, BatchTransport, HttpReply};
use crate::types::{BatchBody, Call, CallOutcome, CallRequest, CallResponse};

type Reply = oneshot::Sender<Result<CallResponse, ClientError>>;

struct Queued {
    call: Call,
    headers: Vec<(String, String)>,
    reply: Reply,
}

struct Group {
    endpoint: String,
    query: Vec<(String, String)>,
    generation: u64,
    calls: Vec<Queued>,
}

struct Inner {
    transport: Arc<dyn BatchTransport>,
    debounce: Duration,
    groups: Mutex<HashMap<String, Group>>,
}

/// Coalesces concurrent calls into batch requests.
#[derive(Clone)]
pub struct CallMultiplexer {
    inner: Arc<Inner>,
}

impl CallMultiplexer {
    /// Multiplexer flushing each group `debounce` after its last call.
    ///
    /// A zero debounce flushes on the next scheduler tick, which still
    /// coalesces calls issued together (e.g. under `join_all`).
    pub fn new(transport: Arc<dyn BatchTransport>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                debounce,
                groups: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Multiplexer configured from settings.
    pub fn from_settings(transport: Arc<dyn BatchTransport>, settings: &BatchSettings) -> Self {
        Self::new(transport, settings.debounce())
    }

    /// Calls waiting for their group to flush.
    pub fn queued(&self) -> usize {
        self.inner.groups.lock().values().map(|g| g.calls.len()).sum()
    }

    /// Queue one call under `id` and wait for its slice of the batch reply.
    ///
    /// Must be called within a tokio runtime.
    pub async fn submit(
        &self,
        id: String,
        request: &CallRequest,
    ) -> Result<CallResponse, ClientError> {
        let key = group_key(request);
        let (reply, settled) = oneshot::channel();

        let generation = {
            let mut groups = self.inner.groups.lock();
            let group = groups.entry(key.clone()).or_insert_with(|| Group {
                endpoint: request.endpoint.clone(),
                query: request.set_query(),
                generation: 0,
                calls: Vec::new(),
            });
            group.generation += 1;
            group.calls.push(Queued {
                call: Call {
                    id,
                    name: request.name.clone(),
                    payload: request.payload.clone(),
                },
                headers: request.set_headers(),
                reply,
            });
            group.generation
        };

        let inner = Arc::clone(&self.inner);
        drop(tokio::spawn(inner.flush_after_debounce(key, generation)));

        settled.await.unwrap_or_else(|_| {
            Err(ServiceError::internal_server_error("Call was dropped before completing").into())
        })
    }
}

impl std::fmt::Debug for CallMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallMultiplexer")
            .field("debounce", &self.inner.debounce)
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn flush_after_debounce(self: Arc<Self>, key: String, generation: u64) {
        if self.debounce.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.debounce).await;
        }

        // a later call restarted the timer; its own task flushes
        let group = {
            let mut groups = self.groups.lock();
            let current = groups.get(&key).is_some_and(|g| g.generation == generation);
            if current {
                groups.remove(&key)
            } else {
                None
            }
        };
        if let Some(group) = group {
            self.flush(group).await;
        }
    }

    async fn flush(&self, group: Group) {
        let Group {
            endpoint,
            query,
            mut calls,
            ..
        } = group;
        calls.sort_by(|a, b| a.call.name.cmp(&b.call.name));

        let request = BatchRequest {
            endpoint,
            query,
            headers: calls.first().map(|q| q.headers.clone()).unwrap_or_default(),
            body: BatchBody {
                calls: calls.iter().map(|q| q.call.clone()).collect(),
            },
        };
        debug!(endpoint = %request.endpoint, calls = calls.len(), "flushing batch");

        let result = self.transport.send(request).await;
        settle(result, calls);
    }
}

/// Canonical grouping key over the set headers, set query and endpoint.
fn group_key(request: &CallRequest) -> String {
    json!([request.set_headers(), request.set_query(), request.endpoint]).to_string()
}

fn settle(result: Result<HttpReply, TransportError>, calls: Vec<Queued>) {
    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, calls = calls.len(), "batch request failed");
            reject_all(calls, &ClientError::Transport(e));
            return;
        }
    };

    let Some(entries) = reply.body.get("calls").and_then(Value::as_array) else {
        let err = batch_failure(&reply);
        warn!(status = reply.status, error = %err, "batch rejected");
        reject_all(calls, &err);
        return;
    };

    let outcomes: HashMap<String, CallOutcome> = entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<CallOutcome>(entry.clone()) {
            Ok(outcome) => Some((outcome.id.clone(), outcome)),
            Err(e) => {
                warn!(error = %e, "skipping malformed call outcome");
                None
            }
        })
        .collect();

    for queued in calls {
        let result = match outcomes.get(&queued.call.id) {
            None => {
                warn!(
                    id = %queued.call.id,
                    name = %queued.call.name,
                    "call not returned in batch response"
                );
                Err(ServiceError::internal_server_error("Call not returned").into())
            }
            Some(outcome) if outcome.is_success() => Ok(CallResponse {
                data: outcome.result.clone(),
                status: outcome.status,
                headers: reply.headers.clone(),
            }),
            Some(outcome) => {
                Err(ServiceError::from_response(&outcome.result, outcome.status).into())
            }
        };
        let _ = queued.reply.send(result);
    }
}

/// Error for a reply that carries no per-call outcomes.
fn batch_failure(reply: &HttpReply) -> ClientError {
    if ServiceError::is_error_body(&reply.body) || !(200..300).contains(&reply.status) {
        ServiceError::from_response(&reply.body, reply.status).into()
    } else {
        TransportError::Malformed("response has no calls array".into()).into()
    }
}

fn reject_all(calls: Vec<Queued>, err: &ClientError) {
    for queued in calls {
        let _ = queued.reply.send(Err(err.clone()));
    }
}
