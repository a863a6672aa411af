use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{error, info, warn};

use super::checker::Checker;
use super::types::{Job, ProbeOutcome};
use crate::diagnosis::{DiagnosisError, DiagnosisProvider, FailureReport};
use crate::models::Observation;
use crate::registry::Registry;

/// Executes one job: probe, diagnose on failure, record the observation.
///
/// The running flag is not touched here; the worker pool clears it after
/// the job returns or faults.
pub struct JobExecutor {
    registry: Arc<dyn Registry>,
    checker: Arc<dyn Checker>,
    diagnosis: Option<Arc<dyn DiagnosisProvider>>,
    diagnosis_timeout: Duration,
    job_timeout: Duration,
}

impl JobExecutor {
    /// `job_timeout` is the allowance for a whole job; the diagnosis call
    /// gets at most `diagnosis_timeout` of whatever the probe left over.
    pub fn new(
        registry: Arc<dyn Registry>,
        checker: Arc<dyn Checker>,
        diagnosis: Option<Arc<dyn DiagnosisProvider>>,
        diagnosis_timeout: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self { registry, checker, diagnosis, diagnosis_timeout, job_timeout }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Run the job and write its observation back to the registry
    pub async fn run(&self, job: &Job) {
        let observation = self.execute(job).await;

        if let Err(e) = self.registry.update_observation(job.monitor_id, &observation).await {
            if e.is_not_found() {
                warn!("Monitor {} disappeared before its result was stored, discarding", job.monitor_id);
            } else {
                error!("Failed to store health check result for {}: {}", job.monitor_id, e);
            }
        }
    }

    /// Probe the target and build the observation without storing it
    pub async fn execute(&self, job: &Job) -> Observation {
        let started = Instant::now();
        let outcome = self.checker.check(&job.url).await;
        let checked_at = SystemTime::now();

        match &outcome {
            ProbeOutcome::InvalidRequest { error } => {
                error!("Failed to create health check request for {} ({}): {}", job.url, job.monitor_id, error);
            }
            ProbeOutcome::Unreachable { latency, error } => {
                warn!("Health check unreachable for {} after {:?}: {}", job.url, latency, error);
            }
            ProbeOutcome::Response { status_code, latency } => {
                info!(
                    "Health check executed for {} - {} - Status: {} - Latency: {:?} - Healthy: {}",
                    job.monitor_id,
                    job.url,
                    status_code,
                    latency,
                    outcome.is_healthy()
                );
            }
        }

        let healthy = outcome.is_healthy();
        let explanation = if healthy {
            String::new()
        } else {
            let report = FailureReport {
                url: job.url.clone(),
                status_code: outcome.status_code(),
                latency: outcome.latency(),
                timestamp: checked_at,
            };
            self.diagnose(&report, started).await
        };

        Observation::checked(checked_at, outcome.status_code(), outcome.latency(), healthy, explanation)
    }

    /// Ask the provider for an explanation, giving up quietly on any failure
    async fn diagnose(&self, report: &FailureReport, job_started: Instant) -> String {
        let Some(provider) = &self.diagnosis else {
            return String::new();
        };

        let remaining = self.job_timeout.saturating_sub(job_started.elapsed());
        let budget = self.diagnosis_timeout.min(remaining);
        if budget.is_zero() {
            warn!("No time left in the job allowance to diagnose {}", report.url);
            return String::new();
        }

        let result = match tokio::time::timeout(budget, provider.analyze_failure(report)).await {
            Ok(result) => result,
            Err(_) => Err(DiagnosisError::Timeout(budget)),
        };

        result.unwrap_or_else(|e| {
            warn!("Failure diagnosis failed for {}: {}", report.url, e);
            String::new()
        })
    }
}
