//! The HTTP exchange behind a batch.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use interconnect_settings::BatchSettings;
use serde_json::Value;
use tracing::debug;

use crate::errors::TransportError;
use crate::types::BatchBody;

/// One physical batch POST.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchRequest {
    /// Endpoint URL, without query.
    pub endpoint: String,
    /// Query string parameters.
    pub query: Vec<(String, String)>,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Calls to run.
    pub body: BatchBody,
}

/// Raw answer to a batch POST.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpReply {
    /// HTTP status.
    pub status: u16,
    /// Response headers, lowercase names.
    pub headers: BTreeMap<String, String>,
    /// JSON body, or the raw text as a JSON string when it is not JSON.
    pub body: Value,
}

/// Sends batch POSTs.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Perform the exchange. Non-2xx statuses are not errors at this level.
    async fn send(&self, request: BatchRequest) -> Result<HttpReply, TransportError>;
}

/// [`BatchTransport`] over `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Transport configured from settings.
    pub fn from_settings(settings: &BatchSettings) -> Result<Self, TransportError> {
        Self::new(settings.http_timeout())
    }

    /// Transport using an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn send(&self, request: BatchRequest) -> Result<HttpReply, TransportError> {
        let mut builder = self.client.post(&request.endpoint);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        // json() leaves a caller-supplied content-type alone
        let response = builder.json(&request.body).send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        debug!(endpoint = %request.endpoint, status, "batch response received");

        Ok(HttpReply {
            status,
            headers,
            body,
        })
    }
}
