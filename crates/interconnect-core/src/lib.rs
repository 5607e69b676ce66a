//! # interconnect-core
//!
//! Foundation pieces shared by the interconnect crates:
//!
//! - [`ids`]: correlation and call ID sequences (root identifier + counter)
//! - [`logging`]: one-shot `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::{IdSequence, plain_id};
