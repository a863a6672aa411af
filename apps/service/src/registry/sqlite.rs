use async_trait::async_trait;
use libsql::{Row, params};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::migrations;
use super::{Registry, RegistryError};
use crate::models::{Monitor, Observation};
use crate::pool::{LibsqlManager, LibsqlPool};

const MONITOR_COLUMNS: &str = "id, owner_id, url, interval_ms, last_checked_ms, status_code, \
                               latency_ms, is_healthy, explanation, is_running";

/// Durable registry on top of an embedded libsql (SQLite) database.
///
/// Each mutation is a single `UPDATE ... WHERE id = ?` statement, so the
/// database serializes writes to one row and readers never observe half an
/// observation.
pub struct LibsqlRegistry {
    pool: LibsqlPool,
}

impl LibsqlRegistry {
    /// Open (or create) the database at `path` and bring its schema up to date
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let database = libsql::Builder::new_local(path.as_ref()).build().await?;
        let pool = LibsqlPool::builder(LibsqlManager::new(database))
            .build()
            .map_err(|e| RegistryError::Pool(e.to_string()))?;

        let registry = Self::new_from_pool(pool);
        let conn = registry.get_conn().await?;
        enable_wal(&conn).await?;
        migrations::run_migrations(&conn).await?;

        Ok(registry)
    }

    /// Create a registry from an existing pool; the schema must already exist
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, RegistryError> {
        self.pool.get().await.map_err(|e| RegistryError::Pool(e.to_string()))
    }

    async fn query_monitors(
        &self,
        sql: &str,
        args: impl libsql::params::IntoParams,
    ) -> Result<Vec<Monitor>, RegistryError> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, args).await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }
}

#[async_trait]
impl Registry for LibsqlRegistry {
    async fn add(&self, monitor: &Monitor) -> Result<(), RegistryError> {
        let conn = self.get_conn().await?;
        let id = monitor.id.to_string();

        // A taken id inserts nothing, which keeps the check and the insert one statement
        let obs = &monitor.observation;
        let inserted = conn.execute(
            "INSERT INTO monitors (id, owner_id, url, interval_ms, last_checked_ms, status_code, latency_ms, is_healthy, explanation, is_running) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
            params![
                id,
                monitor.owner_id.clone(),
                monitor.url.clone(),
                duration_to_ms(monitor.interval),
                obs.last_checked.map(timestamp_to_ms),
                i64::from(obs.status_code),
                duration_to_ms(obs.latency),
                if obs.healthy { 1 } else { 0 },
                obs.explanation.clone(),
                if monitor.running { 1 } else { 0 }
            ],
        )
        .await?;

        if inserted == 0 {
            return Err(RegistryError::AlreadyExists(monitor.id));
        }
        Ok(())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Monitor>, RegistryError> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE owner_id = ? ORDER BY id");
        self.query_monitors(&sql, params![owner_id.to_string()]).await
    }

    async fn list_all(&self) -> Result<Vec<Monitor>, RegistryError> {
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY id");
        self.query_monitors(&sql, ()).await
    }

    async fn update_observation(
        &self,
        id: Uuid,
        observation: &Observation,
    ) -> Result<(), RegistryError> {
        let conn = self.get_conn().await?;

        let affected = conn
            .execute(
                "UPDATE monitors SET last_checked_ms = ?, status_code = ?, latency_ms = ?, is_healthy = ?, explanation = ? WHERE id = ?",
                params![
                    observation.last_checked.map(timestamp_to_ms),
                    i64::from(observation.status_code),
                    duration_to_ms(observation.latency),
                    if observation.healthy { 1 } else { 0 },
                    observation.explanation.clone(),
                    id.to_string()
                ],
            )
            .await?;

        if affected == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    async fn set_running(&self, id: Uuid, running: bool) -> Result<(), RegistryError> {
        let conn = self.get_conn().await?;

        let affected = conn
            .execute(
                "UPDATE monitors SET is_running = ? WHERE id = ?",
                params![if running { 1 } else { 0 }, id.to_string()],
            )
            .await?;

        if affected == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }
}

/// Switch the database file to write-ahead logging so readers do not block
/// the writer. The setting is persistent, so one connection is enough.
async fn enable_wal(conn: &libsql::Connection) -> Result<(), RegistryError> {
    let mut rows = conn.query("PRAGMA journal_mode = WAL", ()).await?;
    if let Some(row) = rows.next().await? {
        let mode: String = row.get(0)?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!("Database stayed in {} journal mode", mode);
        }
    }
    Ok(())
}

fn monitor_from_row(row: &Row) -> Result<Monitor, RegistryError> {
    let id_str: String = row.get(0)?;
    let id = Uuid::parse_str(&id_str).map_err(|e| RegistryError::Corrupt(format!("id '{id_str}': {e}")))?;

    let status_code = row.get::<i64>(5)?;
    let status_code = u16::try_from(status_code)
        .map_err(|_| RegistryError::Corrupt(format!("status code {status_code} for {id}")))?;

    let interval = ms_to_duration(row.get::<i64>(3)?);
    if interval.is_zero() {
        return Err(RegistryError::Corrupt(format!("zero interval for {id}")));
    }

    Ok(Monitor {
        id,
        owner_id: row.get(1)?,
        url: row.get(2)?,
        interval,
        observation: Observation {
            last_checked: row.get::<Option<i64>>(4)?.map(ms_to_timestamp),
            status_code,
            latency: ms_to_duration(row.get::<i64>(6)?),
            healthy: row.get::<i64>(7)? != 0,
            explanation: row.get(8)?,
        },
        running: row.get::<i64>(9)? != 0,
    })
}

fn duration_to_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn ms_to_duration(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// Convert SystemTime to Unix milliseconds
fn timestamp_to_ms(time: SystemTime) -> i64 {
    duration_to_ms(time.duration_since(UNIX_EPOCH).unwrap_or_default())
}

/// Convert Unix milliseconds to SystemTime
fn ms_to_timestamp(ms: i64) -> SystemTime {
    UNIX_EPOCH + ms_to_duration(ms)
}
