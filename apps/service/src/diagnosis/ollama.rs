use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{DiagnosisError, DiagnosisProvider, FailureReport};

/// Upper bound for a single generate call, independent of the worker's own
/// diagnosis timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Diagnosis through a local Ollama `/api/generate` endpoint
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Result<Self, DiagnosisError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self { client, url: url.into(), model: model.into() })
    }

    fn build_prompt(report: &FailureReport) -> String {
        let timestamp = DateTime::<Utc>::from(report.timestamp).to_rfc3339_opts(SecondsFormat::Secs, true);
        let status = if report.status_code == 0 {
            "none (no response received)".to_string()
        } else {
            report.status_code.to_string()
        };

        format!(
            "Analyze this monitoring failure. URL: {}, Status Code: {}, Response Time: {}ms, \
             Timestamp: {}. Briefly explain what might have gone wrong.",
            report.url,
            status,
            report.latency.as_millis(),
            timestamp
        )
    }
}

#[async_trait]
impl DiagnosisProvider for OllamaProvider {
    async fn analyze_failure(&self, report: &FailureReport) -> Result<String, DiagnosisError> {
        let body = GenerateRequest { model: &self.model, prompt: Self::build_prompt(report), stream: false };

        debug!("Requesting failure diagnosis for {} from {}", report.url, self.url);
        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(DiagnosisError::Status(status.as_u16()));
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| DiagnosisError::Decode(e.to_string()))?;

        Ok(parsed.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn report() -> FailureReport {
        FailureReport {
            url: "http://example.test/health".to_string(),
            status_code: 503,
            latency: Duration::from_millis(250),
            timestamp: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn test_prompt_mentions_failure_details() {
        let prompt = OllamaProvider::build_prompt(&report());
        assert!(prompt.contains("http://example.test/health"));
        assert!(prompt.contains("Status Code: 503"));
        assert!(prompt.contains("250ms"));
        assert!(prompt.contains("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn test_prompt_for_unreachable_target() {
        let mut unreachable = report();
        unreachable.status_code = 0;
        unreachable.timestamp = SystemTime::now();
        assert!(OllamaProvider::build_prompt(&unreachable).contains("no response received"));
    }

    #[tokio::test]
    async fn test_analyze_failure_returns_trimmed_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model": "llama3", "stream": false}"#);
                then.status(200)
                    .json_body(serde_json::json!({ "response": "  The upstream service is overloaded.\n" }));
            })
            .await;

        let provider = OllamaProvider::new(server.url("/api/generate"), "llama3").unwrap();
        let explanation = provider.analyze_failure(&report()).await.unwrap();

        assert_eq!(explanation, "The upstream service is overloaded.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_ok_status_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500);
            })
            .await;

        let provider = OllamaProvider::new(server.url("/api/generate"), "llama3").unwrap();
        let err = provider.analyze_failure(&report()).await.unwrap_err();
        assert!(matches!(err, DiagnosisError::Status(500)));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_a_decode_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).body("not json");
            })
            .await;

        let provider = OllamaProvider::new(server.url("/api/generate"), "llama3").unwrap();
        let err = provider.analyze_failure(&report()).await.unwrap_err();
        assert!(matches!(err, DiagnosisError::Decode(_)));
    }
}
