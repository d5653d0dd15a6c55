//! Search run bookkeeping, one row per (target, user)

use crate::models::{RunTarget, SearchRun};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[async_trait]
pub trait SearchRunStore: Send + Sync {
    /// Create or update the run for (target, user) and stamp `last_accessed`.
    async fn touch(
        &self,
        target: &RunTarget,
        user_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<SearchRun>;

    /// Remove all runs for a target, e.g. when its definition is destroyed.
    async fn forget(&self, target: &RunTarget) -> Result<u64>;
}

#[derive(Clone)]
pub struct PgSearchRunStore {
    pool: PgPool,
}

impl PgSearchRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchRunStore for PgSearchRunStore {
    async fn touch(
        &self,
        target: &RunTarget,
        user_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<SearchRun> {
        let row = sqlx::query(
            r#"
            INSERT INTO search_runs (target_key, user_id, page, per_page, last_accessed)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (target_key, user_id)
            DO UPDATE SET page = EXCLUDED.page,
                          per_page = EXCLUDED.per_page,
                          last_accessed = EXCLUDED.last_accessed
            RETURNING id, last_accessed
            "#,
        )
        .bind(target.storage_key())
        .bind(user_id)
        .bind(i32::try_from(page).unwrap_or(i32::MAX))
        .bind(i32::try_from(per_page).unwrap_or(i32::MAX))
        .fetch_one(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        Ok(SearchRun {
            id: row.get("id"),
            target: target.clone(),
            user_id,
            page,
            per_page,
            last_accessed: row.get("last_accessed"),
        })
    }

    async fn forget(&self, target: &RunTarget) -> Result<u64> {
        let result = sqlx::query("DELETE FROM search_runs WHERE target_key = $1")
            .bind(target.storage_key())
            .execute(&self.pool)
            .await
            .map_err(crate::Error::Database)?;
        Ok(result.rows_affected())
    }
}

#[derive(Default)]
pub struct MemorySearchRunStore {
    runs: Mutex<(i64, HashMap<(String, i64), SearchRun>)>,
}

impl MemorySearchRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.runs.lock().await.1.len()
    }
}

#[async_trait]
impl SearchRunStore for MemorySearchRunStore {
    async fn touch(
        &self,
        target: &RunTarget,
        user_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<SearchRun> {
        let mut guard = self.runs.lock().await;
        let (next_id, runs) = &mut *guard;
        let key = (target.storage_key(), user_id);
        let run = runs.entry(key).or_insert_with(|| {
            *next_id += 1;
            SearchRun {
                id: *next_id,
                target: target.clone(),
                user_id,
                page,
                per_page,
                last_accessed: Utc::now(),
            }
        });
        run.page = page;
        run.per_page = per_page;
        run.last_accessed = Utc::now();
        Ok(run.clone())
    }

    async fn forget(&self, target: &RunTarget) -> Result<u64> {
        let key = target.storage_key();
        let mut guard = self.runs.lock().await;
        let before = guard.1.len();
        guard.1.retain(|(k, _), _| *k != key);
        Ok((before - guard.1.len()) as u64)
    }
}
