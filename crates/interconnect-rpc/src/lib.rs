//! # interconnect-rpc
//!
//! Batched HTTP calls between generated SDK clients and a service.
//!
//! - [`types`]: logical call requests and the batch wire format
//! - [`errors`]: service errors as they cross the wire, plus client-side failures
//! - [`transport`]: the HTTP POST seam and its `reqwest` implementation
//! - [`mux`]: debounced grouping of concurrent calls into one request
//! - [`retry`]: per-call retry policy and the [`RpcClient`] entry point
//! - [`server`]: the receiving end, an axum router that fans a batch out to handlers

#![deny(unsafe_code)]

pub mod errors;
pub mod mux;
pub mod retry;
pub mod server;
pub mod transport;
pub mod types;

pub use errors::{ClientError, ServiceError, TransportError};
pub use mux::CallMultiplexer;
pub use retry::{RetryPolicy, RpcClient};
pub use server::{BatchRouter, CallHandler};
pub use transport::{BatchRequest, BatchTransport, HttpReply, HttpTransport};
pub use types::{BatchBody, Call, CallOutcome, CallRequest, CallResponse};
