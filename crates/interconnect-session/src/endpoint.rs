//! Reusable method table bound to any number of sessions.
//!
//! ```ignore
//! let endpoint = Endpoint::new()
//!     .request("servers.get", Schema::<GetServer>::new(), |input, _session| async move {
//!         Ok(lookup(&input.id)?)
//!     })
//!     .notification("system/log", AnyValue, |line, _session| async move { Ok(()) });
//!
//! let session = endpoint.connect(transceiver);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::errors::{HandlerError, StructuredError};
use crate::memory::MemoryTransceiver;
use crate::session::{NotificationHandler, RequestHandler, SessionManager, SessionOptions};
use crate::transceiver::Transceiver;
use crate::validation::Validator;
use crate::websocket::WebSocketTransceiver;

/// Something an [`Endpoint`] can be connected to.
pub trait IntoSession {
    /// Produce the session to register handlers on.
    fn into_session(self) -> SessionManager;
}

impl IntoSession for SessionManager {
    fn into_session(self) -> SessionManager {
        self
    }
}

impl IntoSession for Arc<dyn Transceiver> {
    fn into_session(self) -> SessionManager {
        SessionManager::new(self, SessionOptions::default())
    }
}

impl IntoSession for MemoryTransceiver {
    fn into_session(self) -> SessionManager {
        SessionManager::new(Arc::new(self), SessionOptions::default())
    }
}

impl IntoSession for WebSocketTransceiver {
    fn into_session(self) -> SessionManager {
        SessionManager::new(Arc::new(self), SessionOptions::default())
    }
}

/// Request handler that validates its input first.
struct ValidatedRequest<V, F> {
    method: String,
    validator: V,
    handler: F,
}

#[async_trait]
impl<V, F, Fut, R> RequestHandler for ValidatedRequest<V, F>
where
    V: Validator,
    F: Fn(V::Output, SessionManager) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn handle(&self, params: Value, session: SessionManager) -> Result<Value, HandlerError> {
        let input = self
            .validator
            .validate(&params)
            .map_err(|issues| StructuredError::invalid_params(&self.method, &issues))?;
        let output = (self.handler)(input, session).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Notification handler that validates its input first; invalid
/// notifications are logged and dropped.
struct ValidatedNotification<V, F> {
    method: String,
    validator: V,
    handler: F,
}

#[async_trait]
impl<V, F, Fut> NotificationHandler for ValidatedNotification<V, F>
where
    V: Validator,
    F: Fn(V::Output, SessionManager) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Value, session: SessionManager) -> Result<(), HandlerError> {
        match self.validator.validate(&params) {
            Ok(input) => (self.handler)(input, session).await,
            Err(issues) => {
                warn!(
                    method = %self.method,
                    issues = ?issues,
                    "dropping notification with invalid params"
                );
                Ok(())
            }
        }
    }
}

/// A method router: named request and notification handlers, each with an
/// input validator.
///
/// Registering the same method twice keeps the last handler.
#[derive(Clone, Default)]
pub struct Endpoint {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl Endpoint {
    /// Empty endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request handler.
    ///
    /// Params failing `validator` are answered with `-32602` and the
    /// validator's issues under `data.errors`; the handler is not called.
    #[must_use]
    pub fn request<V, F, Fut, R>(
        mut self,
        method: impl Into<String>,
        validator: V,
        handler: F,
    ) -> Self
    where
        V: Validator,
        F: Fn(V::Output, SessionManager) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let method = method.into();
        let handler = ValidatedRequest {
            method: method.clone(),
            validator,
            handler,
        };
        let _ = self.requests.insert(method, Arc::new(handler));
        self
    }

    /// Register a notification handler.
    #[must_use]
    pub fn notification<V, F, Fut>(
        mut self,
        method: impl Into<String>,
        validator: V,
        handler: F,
    ) -> Self
    where
        V: Validator,
        F: Fn(V::Output, SessionManager) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let method = method.into();
        let handler = ValidatedNotification {
            method: method.clone(),
            validator,
            handler,
        };
        let _ = self.notifications.insert(method, Arc::new(handler));
        self
    }

    /// Install every handler on `target` and return its session.
    ///
    /// Handlers receive that session, so they can call back over the same
    /// connection.
    pub fn connect(&self, target: impl IntoSession) -> SessionManager {
        let session = target.into_session();
        for (method, handler) in &self.requests {
            session.register_request(method.clone(), Arc::clone(handler));
        }
        for (method, handler) in &self.notifications {
            session.register_notification(method.clone(), Arc::clone(handler));
        }
        session
    }

    /// Registered request and notification method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .requests
            .keys()
            .chain(self.notifications.keys())
            .cloned()
            .collect();
        methods.sort();
        methods.dedup();
        methods
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("methods", &self.methods())
            .finish()
    }
}
