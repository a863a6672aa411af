//! Failure diagnosis - turns a failed probe into a short natural-language
//! explanation.
//!
//! Diagnosis is best effort: the worker pool bounds every call with its own
//! timeout and records an empty explanation when the provider fails.

pub mod ollama;

pub use ollama::OllamaProvider;

use async_trait::async_trait;
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosisError {
    #[error("Diagnosis request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Diagnosis backend returned status {0}")]
    Status(u16),

    #[error("Diagnosis backend returned an unreadable reply: {0}")]
    Decode(String),

    #[error("Diagnosis timed out after {0:?}")]
    Timeout(Duration),
}

/// Context about a failed health check handed to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub url: String,
    /// `0` when the target never answered
    pub status_code: u16,
    pub latency: Duration,
    pub timestamp: SystemTime,
}

/// Produces explanations for failed probes
#[async_trait]
pub trait DiagnosisProvider: Send + Sync {
    async fn analyze_failure(&self, report: &FailureReport) -> Result<String, DiagnosisError>;
}

/// Provider used when diagnosis is switched off: always explains nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiagnosis;

#[async_trait]
impl DiagnosisProvider for NoDiagnosis {
    async fn analyze_failure(&self, _report: &FailureReport) -> Result<String, DiagnosisError> {
        Ok(String::new())
    }
}
