//! In-memory datastore evaluating predicates with the reference evaluator.
//!
//! Used by embedders without a database and by tests. Supports injected
//! latency and failures so cache and retry behaviour can be exercised.

use super::datastore::{Datastore, Row};
use crate::db::search::{ColumnSpec, RecordValues, SecuredQuery, SortSpec, ValueRef};
use crate::models::ScalarValue;
use crate::{Error, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryRecord {
    pub id: i64,
    /// Native column values by column name.
    pub values: HashMap<String, ScalarValue>,
    /// Custom values by custom definition id.
    pub custom: HashMap<i64, ScalarValue>,
}

impl MemoryRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with(mut self, column: &str, value: ScalarValue) -> Self {
        self.values.insert(column.to_string(), value);
        self
    }

    pub fn with_custom(mut self, definition_id: i64, value: ScalarValue) -> Self {
        self.custom.insert(definition_id, value);
        self
    }
}

impl RecordValues for MemoryRecord {
    fn record_id(&self) -> i64 {
        self.id
    }

    fn value(&self, target: &ValueRef) -> Option<ScalarValue> {
        match target {
            ValueRef::Column { column, .. } => self.values.get(column).cloned(),
            ValueRef::Custom { definition_id, .. } => self.custom.get(definition_id).cloned(),
            ValueRef::RecordId => Some(ScalarValue::Integer(self.id)),
        }
    }
}

#[derive(Default)]
pub struct MemoryDatastore {
    tables: RwLock<HashMap<String, Vec<MemoryRecord>>>,
    latency_ms: AtomicU64,
    failures_remaining: AtomicUsize,
    id_queries: AtomicUsize,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, table: &str, record: MemoryRecord) {
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        rows.retain(|r| r.id != record.id);
        rows.push(record);
    }

    pub async fn remove(&self, table: &str, id: i64) {
        if let Some(rows) = self.tables.write().await.get_mut(table) {
            rows.retain(|r| r.id != id);
        }
    }

    /// Delay every operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, AtomicOrdering::SeqCst);
    }

    /// Fail the next `n` operations with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, AtomicOrdering::SeqCst);
    }

    /// Number of id-list queries executed.
    pub fn id_query_count(&self) -> usize {
        self.id_queries.load(AtomicOrdering::SeqCst)
    }

    async fn simulate(&self) -> Result<()> {
        let latency = self.latency_ms.load(AtomicOrdering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let failed = self
            .failures_remaining
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        if failed {
            return Err(Error::Timeout("injected datastore failure".to_string()));
        }
        Ok(())
    }

    async fn matching(&self, query: &SecuredQuery) -> Vec<MemoryRecord> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&query.module.table) else {
            return Vec::new();
        };
        let mut out: Vec<MemoryRecord> = rows
            .iter()
            .filter(|r| query.filter.matches(*r))
            .cloned()
            .collect();
        out.sort_by(|a, b| compare_records(&query.sorts, a, b));
        out
    }
}

/// Sort keys with NULLS LAST in both directions, then id ascending.
fn compare_records(sorts: &[SortSpec], a: &MemoryRecord, b: &MemoryRecord) -> Ordering {
    for sort in sorts {
        let ord = match (a.value(&sort.target), b.value(&sort.target)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = x.compare(&y).unwrap_or(Ordering::Equal);
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn count(&self, query: &SecuredQuery) -> Result<u64> {
        self.simulate().await?;
        Ok(self.matching(query).await.len() as u64)
    }

    async fn ids(&self, query: &SecuredQuery, offset: u64, limit: u64) -> Result<Vec<i64>> {
        self.id_queries.fetch_add(1, AtomicOrdering::SeqCst);
        self.simulate().await?;
        Ok(self
            .matching(query)
            .await
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|r| r.id)
            .collect())
    }

    async fn hydrate(&self, query: &SecuredQuery, ids: &[i64]) -> Result<Vec<Row>> {
        self.simulate().await?;
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&query.module.table) else {
            return Ok(Vec::new());
        };
        let by_id: HashMap<i64, &MemoryRecord> = rows
            .iter()
            .filter(|r| query.security.matches(*r))
            .map(|r| (r.id, r))
            .collect();

        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|record| Row {
                id: record.id,
                cells: query
                    .columns
                    .iter()
                    .map(|column| match column {
                        ColumnSpec::Constant(text) => Some(ScalarValue::Text(text.clone())),
                        ColumnSpec::Field(field) => record.value(&field.value_ref()),
                    })
                    .collect(),
            })
            .collect())
    }
}
