//! HTTP transport to the local collector.
//!
//! The whole batch is POSTed as the JSON array produced by
//! [`serialize`](crate::serializer::serialize). Any 2xx answer counts as
//! delivered. There is no retry: heartbeats are best-effort and the next
//! flush starts fresh.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use tracing::{debug, info};

use super::{Transport, TransportError, PLUGIN_ID};
use crate::privacy::ApiKey;
use crate::serializer::serialize;
use crate::types::Heartbeat;

/// Path of the heartbeat batch endpoint on the collector.
pub const HEARTBEATS_PATH: &str = "/api/0/heartbeats";

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Header carrying the source (machine) identifier.
pub const SOURCE_ID_HEADER: &str = "X-Source-Id";

/// HTTP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Sends batches to the collector over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: Option<ApiKey>,
    source_id: Option<String>,
}

impl HttpTransport {
    /// Creates a transport for the collector at `base_url`
    /// (e.g., `http://localhost:5600`).
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}{HEARTBEATS_PATH}", base_url.trim_end_matches('/')),
            api_key: None,
            source_id: None,
        })
    }

    /// Sets the API key sent with every batch.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<ApiKey>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Sets the source identifier sent with every batch.
    #[must_use]
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Returns the full endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(PLUGIN_ID));

        if let Some(source_id) = &self.source_id {
            headers.insert(SOURCE_ID_HEADER, HeaderValue::from_str(source_id)?);
        }

        if let Some(key) = &self.api_key {
            let mut value = HeaderValue::from_str(key.expose())?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        Ok(headers)
    }
}

impl Transport for HttpTransport {
    async fn dispatch(&self, batch: &[Heartbeat]) -> Result<(), TransportError> {
        if batch.is_empty() {
            return Err(TransportError::EmptyBatch);
        }

        let body = serialize(batch)?;
        let headers = self.headers()?;

        debug!(
            url = %self.endpoint,
            events = batch.len(),
            bytes = body.len(),
            "Posting heartbeat batch"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(events = batch.len(), "Heartbeats accepted by collector");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
