//! Query execution backends

use crate::db::search::{BindValue, ColumnSpec, SecuredQuery};
use crate::models::ScalarValue;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgPool, Postgres, Row as _};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A display cell. `None` is SQL NULL.
pub type Cell = Option<ScalarValue>;

/// One hydrated record with cells in display-column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub id: i64,
    pub cells: Vec<Cell>,
}

/// Executes secured queries.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn count(&self, query: &SecuredQuery) -> Result<u64>;

    /// Ordered record ids, `limit` starting at `offset`.
    async fn ids(&self, query: &SecuredQuery, offset: u64, limit: u64) -> Result<Vec<i64>>;

    /// Records for `ids` in the order given. Ids the user may not see are dropped.
    async fn hydrate(&self, query: &SecuredQuery, ids: &[i64]) -> Result<Vec<Row>>;
}

/// Handle pairing a secured query with the datastore that runs it.
#[derive(Clone)]
pub struct Query {
    datastore: Arc<dyn Datastore>,
    secured: Arc<SecuredQuery>,
}

impl Query {
    pub fn new(datastore: Arc<dyn Datastore>, secured: SecuredQuery) -> Self {
        Self {
            datastore,
            secured: Arc::new(secured),
        }
    }

    pub fn secured(&self) -> &SecuredQuery {
        &self.secured
    }

    pub async fn count(&self) -> Result<u64> {
        self.datastore.count(&self.secured).await
    }

    /// Ids on 1-based `page` of `page_size`.
    pub async fn page(&self, page: u32, page_size: u32) -> Result<Vec<i64>> {
        if page == 0 || page_size == 0 {
            return Err(Error::Validation(
                "page and per_page must be at least 1".to_string(),
            ));
        }
        let offset = u64::from(page - 1) * u64::from(page_size);
        self.datastore
            .ids(&self.secured, offset, u64::from(page_size))
            .await
    }

    /// Up to `max` ids in order.
    pub async fn all_ids(&self, max: u64) -> Result<Vec<i64>> {
        self.datastore.ids(&self.secured, 0, max).await
    }

    pub async fn hydrate(&self, ids: &[i64]) -> Result<Vec<Row>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.datastore.hydrate(&self.secured, ids).await
    }
}

/// PostgreSQL datastore. Every statement is bounded by `statement_timeout`.
#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgDatastore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let start = std::time::Instant::now();
        let result = match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(result) => result.map_err(Error::Database),
            Err(_) => Err(Error::Timeout(format!(
                "{} query exceeded {:?}",
                what, self.statement_timeout
            ))),
        };
        crate::metrics::DB_QUERY_DURATION_SECONDS
            .with_label_values(&[what])
            .observe(start.elapsed().as_secs_f64());
        result
    }
}

fn bind_query(
    sql: &str,
    binds: Vec<BindValue>,
) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for value in binds {
        query = match value {
            BindValue::Text(v) => query.bind(v),
            BindValue::TextArray(vs) => query.bind(vs),
        };
    }
    query
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn count(&self, query: &SecuredQuery) -> Result<u64> {
        let sql = query.build_count_sql();
        let mut scalar = sqlx::query_scalar::<_, i64>(&sql.sql);
        for value in sql.binds {
            scalar = match value {
                BindValue::Text(v) => scalar.bind(v),
                BindValue::TextArray(vs) => scalar.bind(vs),
            };
        }
        let total = self.bounded("count", scalar.fetch_one(&self.pool)).await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn ids(&self, query: &SecuredQuery, offset: u64, limit: u64) -> Result<Vec<i64>> {
        let sql = query.build_ids_sql(offset, limit);
        let rows = self
            .bounded("ids", bind_query(&sql.sql, sql.binds).fetch_all(&self.pool))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("record_id").map_err(Error::Database))
            .collect()
    }

    async fn hydrate(&self, query: &SecuredQuery, ids: &[i64]) -> Result<Vec<Row>> {
        let sql = query.build_hydrate_sql(ids);
        let rows = self
            .bounded(
                "hydrate",
                bind_query(&sql.sql, sql.binds).fetch_all(&self.pool),
            )
            .await?;

        let mut by_id: HashMap<i64, Row> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let record = read_row(query, row)?;
            by_id.insert(record.id, record);
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

fn read_row(query: &SecuredQuery, row: &PgRow) -> Result<Row> {
    let id: i64 = row.try_get("record_id").map_err(Error::Database)?;
    let mut cells = Vec::with_capacity(query.columns.len());
    for (idx, column) in query.columns.iter().enumerate() {
        let cell = match column {
            ColumnSpec::Constant(text) => Some(ScalarValue::Text(text.clone())),
            ColumnSpec::Field(field) => {
                let raw: Option<String> = row
                    .try_get(format!("c{idx}").as_str())
                    .map_err(Error::Database)?;
                raw.and_then(|raw| ScalarValue::parse_stored(field.data_type, &raw))
            }
        };
        cells.push(cell);
    }
    Ok(Row { id, cells })
}
