use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use super::{InMemoryRegistry, Registry, RegistryError};
use crate::models::{Monitor, Observation};

/// In-memory registry whose first `failures` attempts at clearing a running
/// flag fail with a backend error
pub(crate) struct FlakyRegistry {
    inner: InMemoryRegistry,
    failures: AtomicUsize,
    release_attempts: AtomicUsize,
}

impl FlakyRegistry {
    pub(crate) fn failing_releases(failures: usize) -> Self {
        Self {
            inner: InMemoryRegistry::new(),
            failures: AtomicUsize::new(failures),
            release_attempts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn release_attempts(&self) -> usize {
        self.release_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registry for FlakyRegistry {
    async fn add(&self, monitor: &Monitor) -> Result<(), RegistryError> {
        self.inner.add(monitor).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Monitor>, RegistryError> {
        self.inner.list_by_owner(owner_id).await
    }

    async fn list_all(&self) -> Result<Vec<Monitor>, RegistryError> {
        self.inner.list_all().await
    }

    async fn update_observation(&self, id: Uuid, observation: &Observation) -> Result<(), RegistryError> {
        self.inner.update_observation(id, observation).await
    }

    async fn set_running(&self, id: Uuid, running: bool) -> Result<(), RegistryError> {
        if !running {
            self.release_attempts.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(RegistryError::Pool("database is locked".to_string()));
            }
        }
        self.inner.set_running(id, running).await
    }
}
