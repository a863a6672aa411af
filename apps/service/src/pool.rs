use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

/// How long a connection waits on a locked database before giving up
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out connections to one embedded libsql database
pub struct LibsqlManager {
    database: Database,
    busy_timeout: Duration,
    recycle_count: AtomicUsize,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self::with_busy_timeout(database, DEFAULT_BUSY_TIMEOUT)
    }

    /// Every connection waits up to `busy_timeout` for another writer
    /// instead of failing with "database is locked"
    pub fn with_busy_timeout(database: Database, busy_timeout: Duration) -> Self {
        Self { database, busy_timeout, recycle_count: AtomicUsize::new(0) }
    }

    /// Number of times a pooled connection has been handed back out
    #[cfg(test)]
    fn recycle_count(&self) -> usize {
        self.recycle_count.load(Ordering::Relaxed)
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        self.recycle_count.fetch_add(1, Ordering::Relaxed);

        // Cheap liveness probe before the connection is reused
        conn.query("SELECT 1", ())
            .await?
            .next()
            .await?
            .ok_or(LibsqlError::QueryReturnedNoRows)?;
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;
