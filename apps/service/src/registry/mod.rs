//! Monitor registry - the store of monitor state shared by the scheduler
//! and the worker pool.
//!
//! Two backends implement the same contract:
//! - `InMemoryRegistry` for single-process deployments and tests
//! - `LibsqlRegistry` for durable storage in an embedded SQLite database
//!
//! Every operation is atomic per monitor record, and returned monitors are
//! owned snapshots that never alias the stored state.

pub mod memory;
pub mod migrations;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

pub use memory::InMemoryRegistry;
pub use sqlite::LibsqlRegistry;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Monitor, Observation};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Monitor {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Monitor {0} not found")]
    NotFound(Uuid),

    #[error("Database query failed: {0}")]
    Backend(#[from] libsql::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Stored monitor is malformed: {0}")]
    Corrupt(String),
}

impl RegistryError {
    /// `NotFound` usually means the monitor was removed while a probe was in
    /// flight, so callers on the scheduling path log it and move on.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

/// Data access contract for monitors
#[async_trait]
pub trait Registry: Send + Sync {
    /// Store a new monitor, failing with `AlreadyExists` on an id collision
    async fn add(&self, monitor: &Monitor) -> Result<(), RegistryError>;

    /// All monitors belonging to `owner_id`
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Monitor>, RegistryError>;

    /// All monitors, in a backend-specific but stable order
    async fn list_all(&self) -> Result<Vec<Monitor>, RegistryError>;

    /// Replace the latest observation of a monitor in one write
    async fn update_observation(
        &self,
        id: Uuid,
        observation: &Observation,
    ) -> Result<(), RegistryError>;

    /// Set or clear the in-flight flag of a monitor
    async fn set_running(&self, id: Uuid, running: bool) -> Result<(), RegistryError>;
}
