use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Registry, RegistryError};
use crate::models::{Monitor, Observation};

/// In-memory registry.
///
/// A single map behind a `RwLock`: writers hold the lock for the whole
/// read-modify-write of a record, readers get cloned snapshots. Monitors are
/// kept ordered by id so `list_all` is stable between calls.
#[derive(Default)]
pub struct InMemoryRegistry {
    monitors: RwLock<BTreeMap<Uuid, Monitor>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn add(&self, monitor: &Monitor) -> Result<(), RegistryError> {
        let mut monitors = self.monitors.write().await;

        if monitors.contains_key(&monitor.id) {
            return Err(RegistryError::AlreadyExists(monitor.id));
        }

        monitors.insert(monitor.id, monitor.clone());
        Ok(())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Monitor>, RegistryError> {
        let monitors = self.monitors.read().await;
        Ok(monitors.values().filter(|m| m.owner_id == owner_id).cloned().collect())
    }

    async fn list_all(&self) -> Result<Vec<Monitor>, RegistryError> {
        let monitors = self.monitors.read().await;
        Ok(monitors.values().cloned().collect())
    }

    async fn update_observation(
        &self,
        id: Uuid,
        observation: &Observation,
    ) -> Result<(), RegistryError> {
        let mut monitors = self.monitors.write().await;
        let monitor = monitors.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        monitor.observation = observation.clone();
        Ok(())
    }

    async fn set_running(&self, id: Uuid, running: bool) -> Result<(), RegistryError> {
        let mut monitors = self.monitors.write().await;
        let monitor = monitors.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        monitor.running = running;
        Ok(())
    }
}
