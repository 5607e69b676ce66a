//! Per-call retries over the multiplexer.
//!
//! - [`RetryPolicy`]: attempt ceiling and linear backoff step
//! - [`RpcClient`]: the entry point generated SDK clients call through

use std::sync::Arc;
use std::time::Duration;

use interconnect_core::IdSequence;
use interconnect_settings::BatchSettings;
use tracing::{debug, warn};

use crate::errors::{ClientError, ServiceError};
use crate::mux::CallMultiplexer;
use crate::transport::BatchTransport;
use crate::types::{CallRequest, CallResponse};

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Default attempts per call, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default backoff step; attempt `n` waits `n` steps before the next one.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(1);

/// How often and how patiently a failed call is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first (at least 1).
    pub max_attempts: u32,
    /// Linear backoff step.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    /// Policy configured from settings.
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff_step: settings.backoff_step(),
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `attempt × step`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Batching, retrying call client.
#[derive(Clone, Debug)]
pub struct RpcClient {
    mux: CallMultiplexer,
    policy: RetryPolicy,
    ids: Arc<IdSequence>,
}

impl RpcClient {
    /// Client over `mux` drawing call IDs from the process-wide sequence.
    pub fn new(mux: CallMultiplexer, policy: RetryPolicy) -> Self {
        Self {
            mux,
            policy,
            ids: IdSequence::process(),
        }
    }

    /// Client over `transport` configured from settings.
    pub fn from_settings(transport: Arc<dyn BatchTransport>, settings: &BatchSettings) -> Self {
        Self::new(
            CallMultiplexer::from_settings(transport, settings),
            RetryPolicy::from_settings(settings),
        )
    }

    /// Use a dedicated ID sequence.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<IdSequence>) -> Self {
        self.ids = ids;
        self
    }

    /// The retry policy in force.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run one call, retrying server-side and transport failures.
    ///
    /// Errors with a status below 500 are returned at once. Every attempt
    /// reuses the same call ID. When attempts run out, the last service
    /// error is returned, or a 500 "Unable to reach server" if the last
    /// failure never reached the service.
    pub async fn call(&self, mut request: CallRequest) -> Result<CallResponse, ServiceError> {
        request.strip_unset();
        let id = self.ids.next_id();
        debug!(call = %request.name, %id, "queued");

        let mut last_error = None;
        for attempt in 1..=self.policy.max_attempts.max(1) {
            match self.mux.submit(id.clone(), &request).await {
                Ok(response) => {
                    debug!(call = %request.name, %id, status = response.status, "success");
                    return Ok(response);
                }
                Err(ClientError::Service(e)) if e.is_client_error() => {
                    debug!(call = %request.name, %id, error = %e, "failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(call = %request.name, %id, attempt, error = %e, "attempt failed");
                    last_error = Some(e);
                }
            }
            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.backoff_delay(attempt)).await;
            }
        }

        Err(match last_error {
            Some(ClientError::Service(e)) => e,
            _ => ServiceError::internal_server_error("Unable to reach server"),
        })
    }
}
