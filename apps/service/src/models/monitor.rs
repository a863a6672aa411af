use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Check interval must be greater than zero")]
    InvalidInterval,

    #[error("Invalid monitor target: {0}")]
    InvalidUrl(String),
}

/// Status codes in `[200, 400)` count as healthy, everything else does not
pub fn is_healthy_status(status_code: u16) -> bool {
    (200..400).contains(&status_code)
}

/// Latest observation recorded for a monitor.
///
/// Written as a whole by the worker that probed the monitor, so the status
/// code, latency and explanation always describe the same check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// When the last probe finished (`None` until the first check)
    pub last_checked: Option<SystemTime>,

    /// HTTP status code, `0` when no response was received
    pub status_code: u16,

    /// Measured round trip of the last probe
    pub latency: Duration,

    pub healthy: bool,

    /// Diagnosis text for a failed probe, empty otherwise
    pub explanation: String,
}

impl Observation {
    /// Observation for a completed probe
    pub fn checked(
        at: SystemTime,
        status_code: u16,
        latency: Duration,
        healthy: bool,
        explanation: String,
    ) -> Self {
        Self { last_checked: Some(at), status_code, latency, healthy, explanation }
    }
}

/// Monitor model - a registered target under periodic health observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub owner_id: String,
    pub url: String,
    pub interval: Duration,
    pub observation: Observation,

    /// Set while a probe for this monitor is in flight
    pub running: bool,
}

impl Monitor {
    /// Create a new, never checked monitor
    pub fn new(
        owner_id: impl Into<String>,
        url: impl Into<String>,
        interval: Duration,
    ) -> Result<Self, MonitorError> {
        Self::with_id(Uuid::new_v4(), owner_id, url, interval)
    }

    pub fn with_id(
        id: Uuid,
        owner_id: impl Into<String>,
        url: impl Into<String>,
        interval: Duration,
    ) -> Result<Self, MonitorError> {
        if interval.is_zero() {
            return Err(MonitorError::InvalidInterval);
        }

        let url = url.into();
        if url.trim().is_empty() {
            return Err(MonitorError::InvalidUrl("empty URL".to_string()));
        }

        Ok(Self {
            id,
            owner_id: owner_id.into(),
            url,
            interval,
            observation: Observation::default(),
            running: false,
        })
    }

    /// Whether the monitor should be probed at `now`.
    ///
    /// A monitor with a probe in flight is never due. A never checked
    /// monitor is always due; a `last_checked` ahead of `now` (clock step)
    /// counts as zero elapsed time.
    pub fn is_due(&self, now: SystemTime) -> bool {
        if self.running {
            return false;
        }

        match self.observation.last_checked {
            None => true,
            Some(last) => now.duration_since(last).unwrap_or(Duration::ZERO) >= self.interval,
        }
    }
}
