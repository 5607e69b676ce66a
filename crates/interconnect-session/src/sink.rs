//! Observability sink for unexpected handler faults.

use serde_json::Value;
use tracing::error;

/// An uncaught error or panic raised by a request handler.
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerFault {
    /// Method being handled.
    pub method: String,
    /// Params the handler received.
    pub params: Value,
    /// Error text (or panic payload).
    pub error: String,
}

/// Receives full details of internal faults; the remote caller only sees a
/// redacted error.
#[cfg_attr(test, mockall::automock)]
pub trait FaultSink: Send + Sync {
    /// Record one fault.
    fn report(&self, fault: &HandlerFault);
}

/// Default sink: one `error!` event per fault.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn report(&self, fault: &HandlerFault) {
        error!(
            method = %fault.method,
            params = %fault.params,
            error = %fault.error,
            "unhandled error in request handler"
        );
    }
}
