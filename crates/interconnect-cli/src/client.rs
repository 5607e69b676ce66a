//! One-shot clients for the `call` and `batch` subcommands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use interconnect_rpc::{CallRequest, CallResponse, HttpTransport, RpcClient, ServiceError};
use interconnect_session::{SessionManager, SessionOptions, WebSocketTransceiver};
use interconnect_settings::{BatchSettings, SessionSettings};
use serde_json::Value;
use tracing::debug;

/// Connect to `url`, send one request, close, and return the result.
pub async fn call(
    url: &str,
    method: &str,
    params: Value,
    timeout: Option<Duration>,
    settings: &SessionSettings,
) -> Result<Value> {
    let transceiver = WebSocketTransceiver::connect(url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;
    let session = SessionManager::new(Arc::new(transceiver), SessionOptions::from_settings(settings));

    let result = match timeout {
        Some(timeout) => session.request_with_timeout(method, params, timeout).await,
        None => session.request(method, params).await,
    };
    if let Err(e) = session.close().await {
        debug!(error = %e, "close after call failed");
    }
    result.with_context(|| format!("{method} failed"))
}

/// Run every call concurrently through one retrying, batching client.
///
/// Outcomes are returned in the order the calls were given.
pub async fn batch(
    endpoint: &str,
    calls: Vec<(String, Value)>,
    headers: &[(String, String)],
    settings: &BatchSettings,
) -> Result<Vec<(String, Result<CallResponse, ServiceError>)>> {
    let transport = HttpTransport::from_settings(settings).context("Failed to build HTTP client")?;
    let client = RpcClient::from_settings(Arc::new(transport), settings);

    let calls = calls.into_iter().map(|(name, payload)| {
        let request = headers.iter().fold(
            CallRequest::new(endpoint, name.clone(), payload),
            |request, (header, value)| request.header(header.clone(), value.clone()),
        );
        let client = client.clone();
        async move { (name, client.call(request).await) }
    });
    Ok(join_all(calls).await)
}
