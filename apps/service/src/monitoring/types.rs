use std::time::Duration;
use uuid::Uuid;

use crate::models::{Monitor, is_healthy_status};

/// A single scheduled probe.
///
/// Snapshot of the monitor's identity and config taken at dispatch time;
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub monitor_id: Uuid,
    pub url: String,
    pub interval: Duration,
}

impl From<&Monitor> for Job {
    fn from(monitor: &Monitor) -> Self {
        Self { monitor_id: monitor.id, url: monitor.url.clone(), interval: monitor.interval }
    }
}

/// What happened to a job handed to the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Enqueued for a worker
    Queued,
    /// The queue was full and the job was discarded
    Dropped,
}

/// Classified result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The request could not be constructed (malformed URL, bad scheme, ...)
    InvalidRequest { error: String },

    /// No response arrived: timeout, refused connection, DNS failure
    Unreachable { latency: Duration, error: String },

    /// The target answered with an HTTP status
    Response { status_code: u16, latency: Duration },
}

impl ProbeOutcome {
    /// Status code to record, `0` when there was no response
    pub fn status_code(&self) -> u16 {
        match self {
            ProbeOutcome::Response { status_code, .. } => *status_code,
            _ => 0,
        }
    }

    /// Latency to record; an unbuilt request was never timed
    pub fn latency(&self) -> Duration {
        match self {
            ProbeOutcome::InvalidRequest { .. } => Duration::ZERO,
            ProbeOutcome::Unreachable { latency, .. } | ProbeOutcome::Response { latency, .. } => {
                *latency
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        match self {
            ProbeOutcome::Response { status_code, .. } => is_healthy_status(*status_code),
            _ => false,
        }
    }
}
