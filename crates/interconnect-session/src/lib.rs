//! # interconnect-session
//!
//! A bidirectional, correlation-based call/response/notification protocol
//! multiplexed over one logical connection.
//!
//! - [`envelope`]: the wire-level message union
//! - [`transceiver`]: the duplex transport abstraction and listener registry
//! - [`memory`] / [`websocket`]: concrete transceivers
//! - [`session`]: request correlation, timeouts and inbound dispatch
//! - [`endpoint`]: a reusable method table bound to many sessions
//! - [`validation`]: the runtime type-checking boundary for payloads

#![deny(unsafe_code)]

pub mod endpoint;
pub mod envelope;
pub mod errors;
pub mod memory;
pub mod session;
pub mod sink;
pub mod transceiver;
pub mod validation;
pub mod websocket;

pub use endpoint::{Endpoint, IntoSession};
pub use envelope::{Envelope, PROTOCOL_TAG, PROTOCOL_VERSION};
pub use errors::{HandlerError, ProtocolError, SessionError, StructuredError, TransportError};
pub use memory::MemoryTransceiver;
pub use session::{NotificationHandler, RequestHandler, SessionManager, SessionOptions};
pub use sink::{FaultSink, HandlerFault, TracingFaultSink};
pub use transceiver::{ListenOptions, Listeners, Subscription, Transceiver};
pub use validation::{AnyValue, Schema, Shape, ValidationIssue, Validator};
pub use websocket::WebSocketTransceiver;
