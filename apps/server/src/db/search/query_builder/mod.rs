//! Secured query builder.
//!
//! Combines a search definition's compiled criteria with the module's row
//! security predicate and any caller scoping into one query:
//! - every criterion is ANDed in rank order
//! - row security is always ANDed unless the module exempts admins
//! - sort keys apply in rank order with the record id as a final tiebreaker
//!
//! The resulting [`SecuredQuery`] renders count, id-page and hydrate SQL.

pub(crate) mod bind;

use super::compiler::{compile_criterion, CompileContext};
use super::escape::quote_ident;
use super::predicate::{Predicate, SqlContext, ValueRef};
use crate::error::CompileError;
use crate::fields::{Field, FieldRegistry, ModuleDef};
use crate::models::{ColumnSource, DataType, SearchDefinition, User};
use crate::{Error, Result};
use bind::{push_text, push_text_array};
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Bind values for `sqlx` queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    Text(String),
    TextArray(Vec<String>),
}

/// Rendered SQL with its bind values in `$n` order.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

/// Additional restriction supplied by the caller, e.g. the records created from
/// one uploaded file.
#[derive(Debug, Clone, Default)]
pub struct QueryScope {
    pub record_ids: Option<Vec<i64>>,
    pub extra: Option<Predicate>,
}

impl QueryScope {
    pub fn unscoped() -> Self {
        Self::default()
    }

    pub fn records(ids: Vec<i64>) -> Self {
        Self {
            record_ids: Some(ids),
            extra: None,
        }
    }

    fn predicate(&self) -> Predicate {
        let mut parts = Vec::new();
        if let Some(ids) = &self.record_ids {
            parts.push(Predicate::IdIn(ids.clone()));
        }
        if let Some(extra) = &self.extra {
            parts.push(extra.clone());
        }
        Predicate::and(parts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortSpec {
    pub target: ValueRef,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub enum ColumnSpec {
    Field(Arc<Field>),
    Constant(String),
}

impl ColumnSpec {
    pub fn header(&self) -> &str {
        match self {
            Self::Field(field) => &field.label,
            Self::Constant(_) => "",
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::Field(field) => field.data_type,
            Self::Constant(_) => DataType::String,
        }
    }
}

/// A compiled, secured query ready for execution.
#[derive(Debug, Clone)]
pub struct SecuredQuery {
    pub module: Arc<ModuleDef>,
    /// Criteria, row security and scope.
    pub filter: Predicate,
    /// Row security alone, re-applied when hydrating.
    pub security: Predicate,
    pub sorts: Vec<SortSpec>,
    pub columns: Vec<ColumnSpec>,
}

const ALIAS: &str = "r";

impl SecuredQuery {
    fn ctx(&self) -> SqlContext<'_> {
        SqlContext {
            alias: ALIAS,
            id_column: &self.module.id_column,
        }
    }

    fn from_clause(&self) -> String {
        format!("FROM {} {}", quote_ident(&self.module.table), ALIAS)
    }

    fn id_expr(&self) -> String {
        format!("{}.{}", ALIAS, quote_ident(&self.module.id_column))
    }

    pub fn build_count_sql(&self) -> SqlQuery {
        let mut binds = Vec::new();
        let where_clause = self.filter.to_sql(&self.ctx(), &mut binds);
        SqlQuery {
            sql: format!("SELECT COUNT(*) {} WHERE {}", self.from_clause(), where_clause),
            binds,
        }
    }

    pub fn build_ids_sql(&self, offset: u64, limit: u64) -> SqlQuery {
        let mut binds = Vec::new();
        let ctx = self.ctx();
        let where_clause = self.filter.to_sql(&ctx, &mut binds);

        let mut order = Vec::with_capacity(self.sorts.len() + 1);
        for sort in &self.sorts {
            let expr = sort.target.sql_expr(&ctx);
            let expr = if sort.target.data_type().is_textual() {
                format!("lower({})", expr)
            } else {
                expr
            };
            let dir = if sort.descending { "DESC" } else { "ASC" };
            order.push(format!("{} {} NULLS LAST", expr, dir));
        }
        order.push(format!("{} ASC", self.id_expr()));

        let limit_idx = push_text(&mut binds, limit.to_string());
        let offset_idx = push_text(&mut binds, offset.to_string());

        SqlQuery {
            sql: format!(
                "SELECT {}::bigint AS record_id {} WHERE {} ORDER BY {} LIMIT ${}::bigint OFFSET ${}::bigint",
                self.id_expr(),
                self.from_clause(),
                where_clause,
                order.join(", "),
                limit_idx,
                offset_idx
            ),
            binds,
        }
    }

    /// Cells for `ids`, selected as text in column order (`c0`, `c1`, ...).
    /// Constant columns are not selected.
    pub fn build_hydrate_sql(&self, ids: &[i64]) -> SqlQuery {
        let mut binds = Vec::new();
        let ctx = self.ctx();

        let mut select = vec![format!("{}::bigint AS record_id", self.id_expr())];
        for (idx, column) in self.columns.iter().enumerate() {
            if let ColumnSpec::Field(field) = column {
                select.push(format!("{} AS c{}", cell_sql(field, &ctx), idx));
            }
        }

        let ids_idx = push_text_array(&mut binds, ids.iter().map(i64::to_string).collect());
        let security = self.security.to_sql(&ctx, &mut binds);

        SqlQuery {
            sql: format!(
                "SELECT {} {} WHERE {} = ANY(${}::bigint[]) AND {}",
                select.join(", "),
                self.from_clause(),
                self.id_expr(),
                ids_idx,
                security
            ),
            binds,
        }
    }

    /// Stable digest of filter and ordering. Changes whenever the query would
    /// select or order rows differently.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.module.id.hash(&mut hasher);
        format!("{:?}", self.filter).hash(&mut hasher);
        self.sorts.hash(&mut hasher);
        hasher.finish()
    }
}

fn cell_sql(field: &Field, ctx: &SqlContext<'_>) -> String {
    let expr = field.value_ref().sql_expr(ctx);
    match field.data_type {
        DataType::DateTime => format!(
            "to_char({} AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"')",
            expr
        ),
        DataType::Date => format!("to_char({}, 'YYYY-MM-DD')", expr),
        _ => format!("({})::text", expr),
    }
}

/// Builds [`SecuredQuery`]s from search definitions.
pub struct SecuredQueryBuilder<'a> {
    registry: &'a FieldRegistry,
}

impl<'a> SecuredQueryBuilder<'a> {
    pub fn new(registry: &'a FieldRegistry) -> Self {
        Self { registry }
    }

    pub async fn build(
        &self,
        definition: &SearchDefinition,
        user: &User,
        scope: &QueryScope,
        now: DateTime<Utc>,
    ) -> Result<SecuredQuery> {
        let module = self.registry.module(&definition.module)?;
        let ctx = CompileContext::for_user(user, now);

        let criteria = definition.criteria_by_rank();
        if criteria.is_empty() && module.requires_criterion {
            return Err(CompileError::MissingCriterion {
                module: module.id.to_string(),
            }
            .into());
        }

        let mut parts = Vec::with_capacity(criteria.len() + 2);
        for criterion in criteria {
            let field = self
                .registry
                .find_in(&module.id, &criterion.field_uid)
                .await?;
            parts.push(compile_criterion(&field, criterion, &ctx)?);
        }

        let security = module.security_predicate(user);
        parts.push(security.clone());
        parts.push(scope.predicate());

        let mut sorts = Vec::new();
        for sort in definition.sort_keys_by_rank() {
            let field = self.visible_field(&module, &sort.field_uid, user).await?;
            sorts.push(SortSpec {
                target: field.value_ref(),
                descending: sort.descending,
            });
        }

        let mut columns = Vec::new();
        for column in definition.columns_by_rank() {
            match &column.source {
                ColumnSource::Constant(text) => columns.push(ColumnSpec::Constant(text.clone())),
                ColumnSource::FieldUid(uid) => {
                    match self.visible_field(&module, uid, user).await {
                        Ok(field) => columns.push(ColumnSpec::Field(field)),
                        Err(Error::Compile(CompileError::UnknownField { .. })) => {
                            tracing::warn!(
                                search_definition_id = definition.id,
                                uid = %uid,
                                "Skipping column for unknown field"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Ok(SecuredQuery {
            module,
            filter: Predicate::and(parts),
            security,
            sorts,
            columns,
        })
    }

    async fn visible_field(
        &self,
        module: &ModuleDef,
        uid: &str,
        user: &User,
    ) -> Result<Arc<Field>> {
        let field = self.registry.find_in(&module.id, uid).await?;
        if !field.is_visible_to(user) {
            tracing::warn!(
                user_id = user.id,
                uid = %uid,
                "Rejected sort or column on field not visible to user"
            );
            return Err(CompileError::ForbiddenField {
                uid: uid.to_string(),
            }
            .into());
        }
        Ok(field)
    }
}
