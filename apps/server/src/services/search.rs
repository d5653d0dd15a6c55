//! Search service - executes saved and ad hoc searches
//!
//! Orchestrates a search by:
//! - Building the secured query for the acting user
//! - Paging through the result cache
//! - Hydrating the page's records in display-column order
//! - Recording the search run for the (target, user) pair

use crate::cache::{CacheKey, ResultCache};
use crate::db::search::{
    compile, ColumnSpec, CompileContext, Operator, Predicate, QueryScope, SecuredQuery,
    SecuredQueryBuilder,
};
use crate::db::{Datastore, DefinitionStore, Query, Row, SearchRunStore};
use crate::fields::FieldRegistry;
use crate::models::{ModuleId, RunTarget, SearchDefinition, User};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub default_per_page: u32,
    pub max_per_page: u32,
    /// Attempts for an interactive execution, including the first.
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_per_page: 50,
            max_per_page: 500,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub results: Vec<Row>,
    /// Column headers matching each row's cells.
    pub columns: Vec<String>,
    pub total_count: u64,
    pub search_run_id: i64,
    pub page: u32,
    pub per_page: u32,
}

pub struct SearchService {
    registry: Arc<FieldRegistry>,
    definitions: Arc<dyn DefinitionStore>,
    datastore: Arc<dyn Datastore>,
    runs: Arc<dyn SearchRunStore>,
    cache: ResultCache,
    settings: SearchSettings,
}

impl SearchService {
    pub fn new(
        registry: Arc<FieldRegistry>,
        definitions: Arc<dyn DefinitionStore>,
        datastore: Arc<dyn Datastore>,
        runs: Arc<dyn SearchRunStore>,
        cache: ResultCache,
        settings: SearchSettings,
    ) -> Self {
        Self {
            registry,
            definitions,
            datastore,
            runs,
            cache,
            settings,
        }
    }

    /// Run a saved search owned by `user`.
    pub async fn execute(
        &self,
        user: &User,
        definition_id: i64,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<SearchPage> {
        let definition = self
            .definitions
            .get(definition_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("search definition {definition_id}")))?;
        if definition.user_id != user.id && !user.sys_admin {
            return Err(Error::Forbidden(format!(
                "search definition {definition_id} belongs to another user"
            )));
        }

        self.run(
            user,
            RunTarget::Definition(definition_id),
            &definition,
            &QueryScope::unscoped(),
            page,
            per_page,
        )
        .await
    }

    /// Run an unsaved definition, e.g. the implicit search behind an uploaded
    /// file. Results are cached under `key` for this user.
    pub async fn execute_ad_hoc(
        &self,
        user: &User,
        key: &str,
        definition: &SearchDefinition,
        scope: &QueryScope,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<SearchPage> {
        self.run(
            user,
            RunTarget::AdHoc(key.to_string()),
            definition,
            scope,
            page,
            per_page,
        )
        .await
    }

    /// Case-insensitive "contains" over the module's quick-searchable text fields.
    pub async fn quick_search(
        &self,
        user: &User,
        module: &ModuleId,
        term: &str,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<SearchPage> {
        let term = term.trim();
        if term.is_empty() {
            return Err(Error::Validation("search term is required".to_string()));
        }
        let module_def = self.registry.module(module)?;
        let fields: Vec<_> = self
            .registry
            .quick_search_fields(module, user)
            .await?
            .into_iter()
            .filter(|f| Operator::Contains.legal_for(f.data_type))
            .collect();
        if fields.is_empty() {
            return Err(Error::Validation(format!(
                "module {module} has no quick search fields"
            )));
        }

        let ctx = CompileContext::for_user(user, Utc::now());
        let mut matches = Vec::with_capacity(fields.len());
        for field in &fields {
            matches.push(compile(field, Operator::Contains, term, None, false, &ctx)?);
        }
        let security = module_def.security_predicate(user);
        let secured = SecuredQuery {
            module: module_def,
            filter: Predicate::and(vec![Predicate::or(matches), security.clone()]),
            security,
            sorts: Vec::new(),
            columns: fields.into_iter().map(ColumnSpec::Field).collect(),
        };

        let target = RunTarget::AdHoc(format!("quick:{module}"));
        self.page_query(user, target, Query::new(self.datastore.clone(), secured), page, per_page)
            .await
    }

    /// Clear a failed cache entry for (target, user) so the next request warms again.
    pub fn retry(&self, user: &User, target: RunTarget) -> bool {
        self.cache.retry(&CacheKey::new(target, user.id))
    }

    async fn run(
        &self,
        user: &User,
        target: RunTarget,
        definition: &SearchDefinition,
        scope: &QueryScope,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<SearchPage> {
        let secured = SecuredQueryBuilder::new(&self.registry)
            .build(definition, user, scope, Utc::now())
            .await
            .map_err(|e| {
                record_execution(&definition.module, "invalid");
                e
            })?;
        let query = Query::new(self.datastore.clone(), secured);
        self.page_query(user, target, query, page, per_page).await
    }

    async fn page_query(
        &self,
        user: &User,
        target: RunTarget,
        query: Query,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<SearchPage> {
        let module = query.secured().module.id.clone();
        let per_page = self.per_page(per_page)?;
        if page == 0 {
            return Err(Error::Validation("page must be at least 1".to_string()));
        }

        let start = Instant::now();
        let key = CacheKey::new(target.clone(), user.id);
        let outcome = async {
            let result = self
                .with_retry("page", || self.cache.page(&key, &query, page, per_page))
                .await?;
            let rows = self
                .with_retry("hydrate", || query.hydrate(&result.ids))
                .await?;
            Ok::<_, Error>((result, rows))
        }
        .await;

        let (result, rows) = match outcome {
            Ok(ok) => ok,
            Err(e) => {
                record_execution(&module, "error");
                return Err(e);
            }
        };
        record_execution(&module, "ok");

        let run = self.runs.touch(&target, user.id, page, per_page).await?;
        tracing::debug!(
            user_id = user.id,
            target = %target.storage_key(),
            page,
            per_page,
            total_count = result.total_count,
            from_cache = result.from_cache,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Search page served"
        );

        Ok(SearchPage {
            results: rows,
            columns: query
                .secured()
                .columns
                .iter()
                .map(|c| c.header().to_string())
                .collect(),
            total_count: result.total_count,
            search_run_id: run.id,
            page,
            per_page,
        })
    }

    fn per_page(&self, requested: Option<u32>) -> Result<u32> {
        match requested {
            None => Ok(self.settings.default_per_page),
            Some(0) => Err(Error::Validation("per_page must be at least 1".to_string())),
            Some(n) => Ok(n.min(self.settings.max_per_page)),
        }
    }

    /// Retry transient failures with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.settings.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.settings.retry_base_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient search failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn record_execution(module: &ModuleId, status: &str) {
    crate::metrics::SEARCH_EXECUTIONS_TOTAL
        .with_label_values(&[module.as_str(), status])
        .inc();
}
