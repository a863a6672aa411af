use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{Monitor, MonitorError};
use crate::registry::{Registry, RegistryError};
use crate::validation::{validate_http_endpoint, validate_interval};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid monitor: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<MonitorError> for ServiceError {
    fn from(e: MonitorError) -> Self {
        ServiceError::Invalid(e.to_string())
    }
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMonitor {
    pub url: String,
    pub interval_seconds: u64,
}

/// Outward shape of a monitor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorView {
    pub id: Uuid,
    pub owner_id: String,
    pub url: String,
    pub interval_seconds: u64,
    pub last_checked: Option<String>,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub is_healthy: bool,
    pub is_running: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub explanation: String,
}

impl From<&Monitor> for MonitorView {
    fn from(monitor: &Monitor) -> Self {
        let observation = &monitor.observation;
        Self {
            id: monitor.id,
            owner_id: monitor.owner_id.clone(),
            url: monitor.url.clone(),
            interval_seconds: monitor.interval.as_secs(),
            last_checked: observation
                .last_checked
                .map(|at| DateTime::<Utc>::from(at).to_rfc3339_opts(SecondsFormat::Millis, true)),
            status_code: observation.status_code,
            response_time_ms: u64::try_from(observation.latency.as_millis()).unwrap_or(u64::MAX),
            is_healthy: observation.healthy,
            is_running: monitor.running,
            explanation: observation.explanation.clone(),
        }
    }
}

/// Thin registration and listing surface over a registry
pub struct MonitorService {
    registry: Arc<dyn Registry>,
}

impl MonitorService {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Validate and store a new monitor for `owner_id`
    pub async fn register(&self, owner_id: &str, request: RegisterMonitor) -> Result<Monitor, ServiceError> {
        if owner_id.trim().is_empty() {
            return Err(ServiceError::Invalid("Owner cannot be empty".to_string()));
        }
        validate_http_endpoint(&request.url).into_result().map_err(ServiceError::Invalid)?;
        validate_interval(request.interval_seconds).into_result().map_err(ServiceError::Invalid)?;

        let monitor = Monitor::new(owner_id, request.url, Duration::from_secs(request.interval_seconds))?;
        self.registry.add(&monitor).await?;

        info!("Registered monitor {} for {} ({})", monitor.id, owner_id, monitor.url);
        Ok(monitor)
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Monitor>, ServiceError> {
        Ok(self.registry.list_by_owner(owner_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Observation;
    use crate::registry::InMemoryRegistry;
    use std::time::UNIX_EPOCH;

    fn service() -> (MonitorService, Arc<InMemoryRegistry>) {
        let registry = Arc::new(InMemoryRegistry::new());
        (MonitorService::new(registry.clone()), registry)
    }

    fn request(url: &str, interval_seconds: u64) -> RegisterMonitor {
        RegisterMonitor { url: url.to_string(), interval_seconds }
    }

    #[tokio::test]
    async fn test_register_stores_unchecked_monitor() {
        let (service, registry) = service();

        let monitor = service.register("alice", request("https://example.com", 30)).await.unwrap();

        assert_eq!(monitor.owner_id, "alice");
        assert_eq!(monitor.interval, Duration::from_secs(30));
        assert!(!monitor.running);
        assert!(monitor.observation.last_checked.is_none());

        let stored = registry.list_all().await.unwrap();
        assert_eq!(stored, vec![monitor]);
    }

    #[tokio::test]
    async fn test_register_generates_distinct_ids() {
        let (service, _registry) = service();
        let a = service.register("alice", request("https://example.com", 30)).await.unwrap();
        let b = service.register("alice", request("https://example.com", 30)).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let (service, registry) = service();

        for (owner, req) in [
            ("alice", request("example.com", 30)),
            ("alice", request("ftp://example.com", 30)),
            ("alice", request("https://example.com", 5)),
            ("", request("https://example.com", 30)),
        ] {
            let err = service.register(owner, req).await.unwrap_err();
            assert!(matches!(err, ServiceError::Invalid(_)), "unexpected error: {err}");
        }

        assert!(registry.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_owner_scoped() {
        let (service, _registry) = service();
        service.register("alice", request("https://a.example.com", 30)).await.unwrap();
        service.register("bob", request("https://b.example.com", 30)).await.unwrap();

        let alice = service.list("alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].url, "https://a.example.com");
        assert!(service.list("carol").await.unwrap().is_empty());
    }

    #[test]
    fn test_view_of_unchecked_monitor() {
        let monitor = Monitor::new("alice", "https://example.com", Duration::from_secs(60)).unwrap();
        let json = serde_json::to_value(MonitorView::from(&monitor)).unwrap();

        assert_eq!(json["intervalSeconds"], 60);
        assert_eq!(json["lastChecked"], serde_json::Value::Null);
        assert_eq!(json["statusCode"], 0);
        assert_eq!(json["isRunning"], false);
        assert!(json.get("explanation").is_none());
    }

    #[test]
    fn test_view_of_failed_check() {
        let mut monitor = Monitor::new("alice", "https://example.com", Duration::from_secs(60)).unwrap();
        monitor.observation = Observation::checked(
            UNIX_EPOCH + Duration::from_millis(1_700_000_000_250),
            503,
            Duration::from_millis(1234),
            false,
            "Upstream is overloaded".to_string(),
        );

        let view = MonitorView::from(&monitor);
        assert_eq!(view.last_checked.as_deref(), Some("2023-11-14T22:13:20.250Z"));
        assert_eq!(view.response_time_ms, 1234);
        assert!(!view.is_healthy);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["explanation"], "Upstream is overloaded");
    }
}
