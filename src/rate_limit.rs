//! Rate-limit lookup against the HTTP throttling service.
//!
//! The service answers `GET <url>?client_id=<peer id>` with a JSON object
//! such as `{"ratelimit_kbps": 456}`. A missing or `null` rate means the
//! client is not throttled.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ThrottleError;

const TIMEOUT_SECS: u64 = 10;

/// Source of per-client rate limits
#[async_trait]
pub trait RateLimitSource: Send + Sync {
    /// Rate limit in kbps for the given peer, or `None` if it is unlimited.
    async fn rate_limit(&self, peer_id: &str) -> Result<Option<u32>, ThrottleError>;
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    #[serde(default, alias = "downstream_kbps")]
    ratelimit_kbps: Option<u32>,
}

/// HTTP client for the throttling service
pub struct HttpRateLimitSource {
    client: Client,
    url: String,
}

impl HttpRateLimitSource {
    pub fn new(url: impl Into<String>) -> Result<Self, ThrottleError> {
        Self::with_timeout(url, Duration::from_secs(TIMEOUT_SECS))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, ThrottleError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("vpn-throttle/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ThrottleError::RateLookup(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RateLimitSource for HttpRateLimitSource {
    async fn rate_limit(&self, peer_id: &str) -> Result<Option<u32>, ThrottleError> {
        if self.url.is_empty() {
            return Err(ThrottleError::RateLookup(
                "no rate-limit service URL configured".to_string(),
            ));
        }

        debug!("Looking up rate limit for {}", peer_id);
        let response = self
            .client
            .get(&self.url)
            .query(&[("client_id", peer_id)])
            .send()
            .await
            .map_err(|e| ThrottleError::RateLookup(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ThrottleError::RateLookup(format!(
                "Request Failed. Status Code: {}",
                status.as_u16()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("application/json") {
            return Err(ThrottleError::RateLookup(format!(
                "Invalid content-type. Expected application/json but received {}",
                content_type
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ThrottleError::RateLookup(format!("Failed to read response: {}", e)))?;
        let rate = parse_response(&body)?;

        match rate {
            Some(kbps) => info!("Rate limit for {}: {} kbps", peer_id, kbps),
            None => info!("No rate limit configured for {}", peer_id),
        }
        Ok(rate)
    }
}

/// Extract the rate from a service response body.
pub fn parse_response(body: &str) -> Result<Option<u32>, ThrottleError> {
    let parsed: RateLimitResponse = serde_json::from_str(body)
        .map_err(|e| ThrottleError::RateLookup(format!("Malformed response {:?}: {}", body, e)))?;
    Ok(parsed.ratelimit_kbps)
}
