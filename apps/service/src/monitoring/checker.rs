use async_trait::async_trait;
use std::time::{Duration, Instant};

use super::types::ProbeOutcome;

/// Performs one health check against a target URL
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, url: &str) -> ProbeOutcome;
}

/// HTTP/HTTPS checker issuing a single GET per probe
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    /// `timeout` bounds the whole request, connect through response headers
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sentinel/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, url: &str) -> ProbeOutcome {
        let request = match self.client.get(url).build() {
            Ok(request) => request,
            Err(e) => return ProbeOutcome::InvalidRequest { error: e.to_string() },
        };

        let start = Instant::now();
        let result = self.client.execute(request).await;
        let latency = start.elapsed();

        match result {
            Ok(response) => ProbeOutcome::Response { status_code: response.status().as_u16(), latency },
            // Unsupported schemes only surface once the request is executed
            Err(e) if e.is_builder() => ProbeOutcome::InvalidRequest { error: e.to_string() },
            Err(e) => {
                let error = if e.is_timeout() {
                    format!("request timed out after {latency:?}")
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    e.to_string()
                };
                ProbeOutcome::Unreachable { latency, error }
            }
        }
    }
}
