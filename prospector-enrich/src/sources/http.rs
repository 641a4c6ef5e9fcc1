//! HTTP transport for external sources
//!
//! A single generic client covers every source: GET `endpoint` with the
//! lookup key as a query parameter, decode the JSON body into the source's
//! payload type, and classify HTTP failures into [`SourceError`]s.
//!
//! # Status mapping
//! - 404 / 410 → NotFound (permanent)
//! - 429 → Throttled, honouring `Retry-After` seconds (transient)
//! - 5xx → Unavailable (transient)
//! - other 4xx → Rejected (permanent)

use super::{LookupKey, SourceClient, SourceError};
use crate::error::PipelineResult;
use crate::types::SourceKind;
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

/// Connection timeout ceiling
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest response excerpt kept in error messages
const ERROR_BODY_EXCERPT: usize = 200;

/// Settings for one HTTP source
#[derive(Debug, Clone)]
pub struct HttpSourceSettings {
    /// Source this client serves
    pub source: SourceKind,
    /// Base URL
    pub endpoint: String,
    /// Query parameter carrying the lookup key
    pub key_param: String,
    /// Query parameter carrying the API key
    pub api_key_param: String,
    /// Resolved credential, if any
    pub api_key: Option<String>,
    /// User-Agent header
    pub user_agent: String,
    /// Whole-request timeout
    pub timeout: Duration,
}

/// reqwest-backed [`SourceClient`]
pub struct HttpSourceClient<P> {
    settings: HttpSourceSettings,
    client: Client,
    _payload: PhantomData<fn() -> P>,
}

impl<P> HttpSourceClient<P> {
    /// Build a client with timeouts from `settings`
    pub fn new(settings: HttpSourceSettings) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(settings.timeout))
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            settings,
            client,
            _payload: PhantomData,
        })
    }

    /// Source served by this client
    pub fn source(&self) -> SourceKind {
        self.settings.source
    }

    fn timeout_ms(&self) -> u64 {
        self.settings.timeout.as_millis() as u64
    }
}

#[async_trait]
impl<P> SourceClient<P> for HttpSourceClient<P>
where
    P: DeserializeOwned + Send + 'static,
{
    async fn call(&self, key: &LookupKey) -> Result<P, SourceError> {
        let mut query: Vec<(&str, &str)> = vec![(self.settings.key_param.as_str(), key.as_str())];
        if let Some(api_key) = self.settings.api_key.as_deref() {
            query.push((self.settings.api_key_param.as_str(), api_key));
        }

        debug!(source = %self.settings.source, key = %key, "Calling external source");

        let response = self
            .client
            .get(&self.settings.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(self.timeout_ms())
                } else {
                    SourceError::Unavailable(format!("request failed: {}", e))
                }
            })?;

        let response = check_status(response, key).await?;

        response.json::<P>().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(self.timeout_ms())
            } else {
                SourceError::Decode(e.to_string())
            }
        })
    }
}

/// Classify a non-success response
async fn check_status(response: Response, key: &LookupKey) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(SourceError::NotFound(key.to_string()));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        return Err(SourceError::Throttled { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();

    if status.is_server_error() {
        Err(SourceError::Unavailable(format!("{}: {}", status, excerpt)))
    } else {
        Err(SourceError::Rejected {
            status: status.as_u16(),
            message: excerpt,
        })
    }
}

/// Parse a `Retry-After` value given in whole seconds
///
/// HTTP-date values are ignored; the fetcher's own backoff applies instead.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
