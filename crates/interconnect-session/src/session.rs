//! Session Manager.
//!
//! Turns a [`Transceiver`] into a correlated call/response/notification API.
//!
//! ```text
//!            outbound                                 inbound
//!  request ──► id ──► pending set ──► send     envelope ──► dispatcher listener
//!                 │                                 │
//!                 └─ per-request listener ◄─────────┤ response / error (by id)
//!                    + once close listener          │
//!                    + timeout                      ├─ request      → handler → reply
//!                                                   └─ notification → handler
//! ```
//!
//! Every outstanding request holds exactly one message listener and one close
//! listener. Both are removed when the request settles, times out, or its
//! future is dropped.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use interconnect_core::IdSequence;
use interconnect_settings::SessionSettings;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::envelope::Envelope;
use crate::errors::{HandlerError, SessionError, StructuredError};
use crate::sink::{FaultSink, HandlerFault, TracingFaultSink};
use crate::transceiver::{ListenOptions, Subscription, Transceiver};
use crate::validation::{AnyValue, Validator};

/// Handles inbound requests for one method.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the result for `params`. `session` is the connection the
    /// request arrived on.
    async fn handle(&self, params: Value, session: SessionManager) -> Result<Value, HandlerError>;
}

/// Handles inbound notifications for one method.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Process `params`. Errors are logged; there is no reply.
    async fn handle(&self, params: Value, session: SessionManager) -> Result<(), HandlerError>;
}

struct FnRequestHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnRequestHandler<F>
where
    F: Fn(Value, SessionManager) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Value, session: SessionManager) -> Result<Value, HandlerError> {
        (self.0)(params, session).await
    }
}

struct FnNotificationHandler<F>(F);

#[async_trait]
impl<F, Fut> NotificationHandler for FnNotificationHandler<F>
where
    F: Fn(Value, SessionManager) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Value, session: SessionManager) -> Result<(), HandlerError> {
        (self.0)(params, session).await
    }
}

/// Construction options for a [`SessionManager`].
#[derive(Clone)]
pub struct SessionOptions {
    /// Reply deadline for requests without an explicit timeout.
    pub request_timeout: Duration,
    /// Request ID source.
    pub ids: Arc<IdSequence>,
    /// Receives internal handler faults.
    pub fault_sink: Arc<dyn FaultSink>,
}

impl SessionOptions {
    /// Options derived from settings, with a fresh ID sequence and the
    /// tracing fault sink.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            request_timeout: settings.request_timeout(),
            ids: Arc::new(IdSequence::with_rollover(settings.id_rollover)),
            fault_sink: Arc::new(TracingFaultSink),
        }
    }

    /// Override the default request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use a specific ID sequence.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<IdSequence>) -> Self {
        self.ids = ids;
        self
    }

    /// Use a specific fault sink.
    #[must_use]
    pub fn with_fault_sink(mut self, sink: Arc<dyn FaultSink>) -> Self {
        self.fault_sink = sink;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("request_timeout", &self.request_timeout)
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

struct Inner {
    transceiver: Arc<dyn Transceiver>,
    options: SessionOptions,
    request_handlers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
    notification_handlers: RwLock<HashMap<String, Arc<dyn NotificationHandler>>>,
    pending: Mutex<HashSet<String>>,
    dispatcher: Mutex<Option<Subscription>>,
}

/// Correlated request/response/notification API over one transceiver.
///
/// Cheap to clone; clones share the connection, handler tables and pending
/// requests. The session stays attached to its transceiver until the
/// transceiver closes.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

type ReplySlot = Arc<Mutex<Option<oneshot::Sender<Result<Value, SessionError>>>>>;

/// Settle a request at most once; later outcomes are discarded.
fn settle(slot: &ReplySlot, outcome: Result<Value, SessionError>) {
    let sender = slot.lock().take();
    if let Some(sender) = sender {
        let _ = sender.send(outcome);
    }
}

/// Removes a request's listeners and pending entry on every exit path.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: String,
    subscriptions: Vec<Subscription>,
}

impl<'a> PendingGuard<'a> {
    fn register(inner: &'a Inner, id: String, subscriptions: Vec<Subscription>) -> Self {
        let _ = inner.pending.lock().insert(id.clone());
        Self {
            inner,
            id,
            subscriptions,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.cancel();
        }
        let _ = self.inner.pending.lock().remove(&self.id);
    }
}

impl SessionManager {
    /// Attach a session to `transceiver`.
    pub fn new(transceiver: Arc<dyn Transceiver>, options: SessionOptions) -> Self {
        let session = Self {
            inner: Arc::new(Inner {
                transceiver,
                options,
                request_handlers: RwLock::new(HashMap::new()),
                notification_handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashSet::new()),
                dispatcher: Mutex::new(None),
            }),
        };

        let dispatch = session.clone();
        let subscription = session.inner.transceiver.on_message(
            Arc::new(move |envelope: &Envelope| dispatch.dispatch(envelope)),
            ListenOptions::default(),
        );
        *session.inner.dispatcher.lock() = Some(subscription);

        let weak = Arc::downgrade(&session.inner);
        let _ = session.inner.transceiver.on_close(
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let dispatcher = inner.dispatcher.lock().take();
                    if let Some(dispatcher) = dispatcher {
                        dispatcher.cancel();
                    }
                    debug!(pending = inner.pending.lock().len(), "session transport closed");
                }
            }),
            ListenOptions::once(),
        );

        session
    }

    /// Attach a session with default options.
    pub fn with_defaults(transceiver: Arc<dyn Transceiver>) -> Self {
        Self::new(transceiver, SessionOptions::default())
    }

    /// The underlying transceiver.
    pub fn transceiver(&self) -> &Arc<dyn Transceiver> {
        &self.inner.transceiver
    }

    /// Number of requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Whether the underlying transport has closed.
    pub fn is_closed(&self) -> bool {
        self.inner.transceiver.is_closed()
    }

    /// Send a request and wait for its result, using the default timeout.
    pub async fn request(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<Value, SessionError> {
        self.request_validated(method, params, &AnyValue, None).await
    }

    /// Send a request with an explicit reply deadline.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: impl Serialize,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        self.request_validated(method, params, &AnyValue, Some(timeout))
            .await
    }

    /// Send a request and run `validator` over the result.
    ///
    /// Fails with [`SessionError::Timeout`] if no reply arrives within
    /// `timeout` (or the session default), [`SessionError::Remote`] if the
    /// peer replied with an error, [`SessionError::Validation`] if the result
    /// does not pass `validator`, and [`SessionError::Closed`] if the transport
    /// closes first. Timeouts are never retried here.
    pub async fn request_validated<V: Validator>(
        &self,
        method: &str,
        params: impl Serialize,
        validator: &V,
        timeout: Option<Duration>,
    ) -> Result<V::Output, SessionError> {
        let params = serde_json::to_value(params)?;
        let timeout = timeout.unwrap_or(self.inner.options.request_timeout);
        let result = self.roundtrip(method, params, timeout).await?;
        validator
            .validate(&result)
            .map_err(|issues| SessionError::Validation {
                method: method.to_string(),
                issues,
            })
    }

    #[instrument(skip(self, params), fields(id))]
    async fn roundtrip(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let transceiver = &self.inner.transceiver;
        let id = self.inner.options.ids.next_id();
        let _ = tracing::Span::current().record("id", id.as_str());

        let (tx, rx) = oneshot::channel();
        let slot: ReplySlot = Arc::new(Mutex::new(Some(tx)));

        let reply_slot = Arc::clone(&slot);
        let reply_id = id.clone();
        let on_reply = transceiver.on_message(
            Arc::new(move |envelope: &Envelope| {
                let outcome = match envelope {
                    Envelope::Response { id, result } if *id == reply_id => Ok(result.clone()),
                    Envelope::ResponseError { id, error } if *id == reply_id => {
                        Err(SessionError::Remote(error.clone()))
                    }
                    _ => return,
                };
                settle(&reply_slot, outcome);
            }),
            ListenOptions::default(),
        );
        let close_slot = Arc::clone(&slot);
        let on_close = transceiver.on_close(
            Arc::new(move || settle(&close_slot, Err(SessionError::Closed))),
            ListenOptions::once(),
        );
        let _guard = PendingGuard::register(&self.inner, id.clone(), vec![on_reply, on_close]);

        if transceiver.is_closed() {
            return Err(SessionError::Closed);
        }
        transceiver
            .send(Envelope::request(id, method, params))
            .await?;
        debug!(method, "request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_dropped)) => Err(SessionError::Closed),
            Err(_elapsed) => {
                // a reply racing the deadline now settles nothing
                drop(slot.lock().take());
                warn!(method, timeout_ms = duration_ms(timeout), "request timed out");
                Err(SessionError::Timeout {
                    method: method.to_string(),
                    timeout_ms: duration_ms(timeout),
                })
            }
        }
    }

    /// Send a notification. Resolves once the transport accepted it.
    pub async fn notify(&self, method: &str, params: impl Serialize) -> Result<(), SessionError> {
        let params = serde_json::to_value(params)?;
        if self.inner.transceiver.is_closed() {
            return Err(SessionError::Closed);
        }
        self.inner
            .transceiver
            .send(Envelope::notification(method, params))
            .await?;
        debug!(method, "notification sent");
        Ok(())
    }

    /// Handle inbound requests for `method` with a closure.
    ///
    /// Registering a method twice replaces the earlier handler.
    pub fn on_request<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value, SessionManager) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register_request(method, Arc::new(FnRequestHandler(handler)));
    }

    /// Handle inbound notifications for `method` with a closure.
    ///
    /// Registering a method twice replaces the earlier handler.
    pub fn on_notification<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value, SessionManager) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register_notification(method, Arc::new(FnNotificationHandler(handler)));
    }

    /// Install a request handler object for `method`.
    pub fn register_request(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        let method = method.into();
        if self
            .inner
            .request_handlers
            .write()
            .insert(method.clone(), handler)
            .is_some()
        {
            debug!(method, "replaced request handler");
        }
    }

    /// Install a notification handler object for `method`.
    pub fn register_notification(
        &self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        let method = method.into();
        if self
            .inner
            .notification_handlers
            .write()
            .insert(method.clone(), handler)
            .is_some()
        {
            debug!(method, "replaced notification handler");
        }
    }

    /// Run `callback` when the transport closes (immediately if it already has).
    pub fn on_close(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner
            .transceiver
            .on_close(Arc::new(callback), ListenOptions::once())
    }

    /// Close the transport. Outstanding requests fail with [`SessionError::Closed`].
    pub async fn close(&self) -> Result<(), SessionError> {
        self.inner.transceiver.close().await?;
        Ok(())
    }

    fn dispatch(&self, envelope: &Envelope) {
        match envelope {
            Envelope::Request { id, method, params } => {
                let handler = self.inner.request_handlers.read().get(method).cloned();
                let session = self.clone();
                let (id, method, params) = (id.clone(), method.clone(), params.clone());
                spawn(async move { session.answer(id, method, params, handler).await });
            }
            Envelope::Notification { method, params } => {
                let handler = self.inner.notification_handlers.read().get(method).cloned();
                let Some(handler) = handler else {
                    debug!(method, "no handler for notification, dropping");
                    return;
                };
                let session = self.clone();
                let (method, params) = (method.clone(), params.clone());
                spawn(async move { session.consume(method, params, handler).await });
            }
            Envelope::Response { id, .. } | Envelope::ResponseError { id, .. } => {
                if !self.inner.pending.lock().contains(id) {
                    warn!(id, "ignoring reply to unknown or expired request");
                }
            }
        }
    }

    async fn answer(
        self,
        id: String,
        method: String,
        params: Value,
        handler: Option<Arc<dyn RequestHandler>>,
    ) {
        let reply = match handler {
            None => {
                debug!(method, "no handler for request");
                Envelope::error(&id, StructuredError::method_not_found(&method))
            }
            Some(handler) => {
                let call = AssertUnwindSafe(handler.handle(params.clone(), self.clone()));
                match call.catch_unwind().await {
                    Ok(Ok(result)) => Envelope::response(&id, result),
                    Ok(Err(err)) => {
                        if let HandlerError::Internal(message) = &err {
                            self.report_fault(&method, params, message.clone());
                        }
                        Envelope::error(&id, err.to_wire())
                    }
                    Err(panic) => {
                        self.report_fault(&method, params, panic_message(panic.as_ref()));
                        Envelope::error(&id, StructuredError::internal())
                    }
                }
            }
        };
        if let Err(e) = self.inner.transceiver.send(reply).await {
            warn!(method, id, error = %e, "failed to send reply");
        }
    }

    async fn consume(self, method: String, params: Value, handler: Arc<dyn NotificationHandler>) {
        let call = AssertUnwindSafe(handler.handle(params.clone(), self.clone()));
        match call.catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(HandlerError::Structured(err))) => {
                warn!(method, error = %err, "notification handler failed");
            }
            Ok(Err(HandlerError::Internal(message))) => {
                self.report_fault(&method, params, message);
            }
            Err(panic) => self.report_fault(&method, params, panic_message(panic.as_ref())),
        }
    }

    fn report_fault(&self, method: &str, params: Value, error: String) {
        self.inner.options.fault_sink.report(&HandlerFault {
            method: method.to_string(),
            params,
            error,
        });
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("pending", &self.pending_requests())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn spawn(task: impl Future<Output = ()> + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => drop(handle.spawn(task)),
        Err(_) => warn!("no tokio runtime available, dropping inbound message"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
