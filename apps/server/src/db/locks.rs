//! Per-schedule mutual exclusion across worker processes

use crate::Result;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// High bits of every advisory lock key taken for schedules.
const SCHEDULE_LOCK_NAMESPACE: i64 = 0x5345_4152 << 32;

#[async_trait]
pub trait ScheduleLocks: Send + Sync {
    /// Try to take the lock for `schedule_id` without waiting.
    async fn try_acquire(&self, schedule_id: i64) -> Result<Option<Box<dyn ScheduleLockGuard>>>;
}

#[async_trait]
pub trait ScheduleLockGuard: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

fn lock_key(schedule_id: i64) -> i64 {
    SCHEDULE_LOCK_NAMESPACE ^ schedule_id
}

/// Session-level `pg_try_advisory_lock`. The guard pins the connection that
/// holds the lock until release.
#[derive(Clone)]
pub struct PgScheduleLocks {
    pool: PgPool,
}

impl PgScheduleLocks {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleLocks for PgScheduleLocks {
    async fn try_acquire(&self, schedule_id: i64) -> Result<Option<Box<dyn ScheduleLockGuard>>> {
        let mut conn = self.pool.acquire().await.map_err(crate::Error::Database)?;
        let key = lock_key(schedule_id);
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(crate::Error::Database)?;
        if !acquired {
            return Ok(None);
        }
        Ok(Some(Box::new(PgLockGuard {
            conn: Some(conn),
            key,
        })))
    }
}

struct PgLockGuard {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

async fn unlock(mut conn: PoolConnection<Postgres>, key: i64) -> Result<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(crate::Error::Database)?;
    Ok(())
}

#[async_trait]
impl ScheduleLockGuard for PgLockGuard {
    async fn release(mut self: Box<Self>) -> Result<()> {
        match self.conn.take() {
            Some(conn) => unlock(conn, self.key).await,
            None => Ok(()),
        }
    }
}

impl Drop for PgLockGuard {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let key = self.key;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = unlock(conn, key).await {
                        tracing::warn!(error = %e, key, "Failed to release schedule lock");
                    }
                });
            }
            // Closing the session releases its advisory locks.
            Err(_) => drop(conn.detach()),
        }
    }
}

/// Process-local locks.
#[derive(Clone, Default)]
pub struct MemoryScheduleLocks {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl MemoryScheduleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, schedule_id: i64) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(&schedule_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ScheduleLocks for MemoryScheduleLocks {
    async fn try_acquire(&self, schedule_id: i64) -> Result<Option<Box<dyn ScheduleLockGuard>>> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| crate::Error::Internal("schedule lock table poisoned".to_string()))?;
        if !held.insert(schedule_id) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLockGuard {
            held: self.held.clone(),
            schedule_id,
        })))
    }
}

struct MemoryLockGuard {
    held: Arc<Mutex<HashSet<i64>>>,
    schedule_id: i64,
}

#[async_trait]
impl ScheduleLockGuard for MemoryLockGuard {
    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.schedule_id);
        }
    }
}
