//! Search definition persistence

use crate::models::{
    Column, ColumnSource, Criterion, Destination, ModuleId, RunWindow, Schedule,
    SearchDefinition, SearchDefinitionDraft, SortKey,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Children of a definition addressable by id for direct deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Criterion,
    SortKey,
    Column,
    Schedule,
}

impl ChildKind {
    fn table(&self) -> &'static str {
        match self {
            Self::Criterion => "search_criteria",
            Self::SortKey => "sort_keys",
            Self::Column => "search_columns",
            Self::Schedule => "search_schedules",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Criterion => "criterion",
            Self::SortKey => "sort key",
            Self::Column => "column",
            Self::Schedule => "schedule",
        }
    }
}

/// Outcome of recording a scheduled run failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub consecutive_failures: i32,
    /// The schedule was disabled by this failure.
    pub disabled_now: bool,
}

#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn insert(
        &self,
        user_id: i64,
        locked: bool,
        draft: &SearchDefinitionDraft,
    ) -> Result<SearchDefinition>;

    /// Replace criteria, sort keys and columns. Schedules whose id matches an
    /// existing schedule are updated in place; others are inserted and missing
    /// ones deleted.
    async fn update(&self, id: i64, draft: &SearchDefinitionDraft) -> Result<SearchDefinition>;

    async fn get(&self, id: i64) -> Result<Option<SearchDefinition>>;

    async fn list_for_user(
        &self,
        user_id: i64,
        module: Option<&ModuleId>,
    ) -> Result<Vec<SearchDefinition>>;

    /// Case-insensitive name check within (user, module).
    async fn name_taken(
        &self,
        user_id: i64,
        module: &ModuleId,
        name: &str,
        excluding: Option<i64>,
    ) -> Result<bool>;

    /// Delete a definition and its children. Returns false if it did not exist.
    async fn delete(&self, id: i64) -> Result<bool>;

    async fn delete_child(&self, definition_id: i64, kind: ChildKind, child_id: i64)
        -> Result<bool>;
}

/// Schedule bookkeeping used by the schedule runner.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Definitions with at least one enabled schedule.
    async fn scheduled_definitions(&self) -> Result<Vec<SearchDefinition>>;

    /// Record that a schedule fired in `window`. Returns false when the schedule
    /// already fired in that window or is disabled.
    async fn claim_window(&self, schedule_id: i64, window: RunWindow) -> Result<bool>;

    async fn record_success(&self, schedule_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Increment the failure count, disabling the schedule once it reaches `threshold`.
    async fn record_failure(
        &self,
        schedule_id: i64,
        reason: &str,
        threshold: i32,
    ) -> Result<FailureOutcome>;
}

/// PostgreSQL implementation of [`DefinitionStore`] and [`ScheduleStore`].
#[derive(Clone)]
pub struct PgDefinitionStore {
    pool: PgPool,
}

#[derive(Default)]
struct Children {
    criteria: Vec<Criterion>,
    sort_keys: Vec<SortKey>,
    columns: Vec<Column>,
    schedules: Vec<Schedule>,
}

const DEFINITION_COLUMNS: &str =
    "id, user_id, module, name, locked, include_links, no_time, created_at, updated_at";

impl PgDefinitionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<SearchDefinition>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.get("id")).collect();
        let mut children = self.load_children(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let id: i64 = row.get("id");
                let kids = children.remove(&id).unwrap_or_default();
                SearchDefinition {
                    id,
                    user_id: row.get("user_id"),
                    module: ModuleId::new(row.get::<String, _>("module")),
                    name: row.get("name"),
                    criteria: kids.criteria,
                    sort_keys: kids.sort_keys,
                    columns: kids.columns,
                    schedules: kids.schedules,
                    locked: row.get("locked"),
                    include_links: row.get("include_links"),
                    no_time: row.get("no_time"),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                }
            })
            .collect())
    }

    async fn load_children(&self, ids: &[i64]) -> Result<HashMap<i64, Children>> {
        let mut out: HashMap<i64, Children> = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }

        let rows = sqlx::query(
            r#"
            SELECT id, search_definition_id, field_uid, operator, value, secondary_value,
                   include_empty, rank
            FROM search_criteria
            WHERE search_definition_id = ANY($1)
            ORDER BY rank, id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        for row in rows {
            let raw_op: String = row.get("operator");
            let operator = raw_op.parse().map_err(|e: String| {
                Error::Internal(format!("stored criterion has {e}"))
            })?;
            out.entry(row.get("search_definition_id"))
                .or_default()
                .criteria
                .push(Criterion {
                    id: row.get("id"),
                    field_uid: row.get("field_uid"),
                    operator,
                    value: row.get("value"),
                    secondary_value: row.get("secondary_value"),
                    include_empty: row.get("include_empty"),
                    rank: row.get("rank"),
                });
        }

        let rows = sqlx::query(
            r#"
            SELECT id, search_definition_id, field_uid, rank, descending
            FROM sort_keys
            WHERE search_definition_id = ANY($1)
            ORDER BY rank, id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        for row in rows {
            out.entry(row.get("search_definition_id"))
                .or_default()
                .sort_keys
                .push(SortKey {
                    id: row.get("id"),
                    field_uid: row.get("field_uid"),
                    rank: row.get("rank"),
                    descending: row.get("descending"),
                });
        }

        let rows = sqlx::query(
            r#"
            SELECT id, search_definition_id, field_uid, constant, rank
            FROM search_columns
            WHERE search_definition_id = ANY($1)
            ORDER BY rank, id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        for row in rows {
            let field_uid: Option<String> = row.get("field_uid");
            let constant: Option<String> = row.get("constant");
            let source = match field_uid {
                Some(uid) => ColumnSource::FieldUid(uid),
                None => ColumnSource::Constant(constant.unwrap_or_default()),
            };
            out.entry(row.get("search_definition_id"))
                .or_default()
                .columns
                .push(Column {
                    id: row.get("id"),
                    source,
                    rank: row.get("rank"),
                });
        }

        let rows = sqlx::query(
            r#"
            SELECT id, search_definition_id, destination,
                   run_monday, run_tuesday, run_wednesday, run_thursday, run_friday,
                   run_saturday, run_sunday, run_hour, last_run_at,
                   last_fired_date, last_fired_hour, consecutive_failure_count,
                   disabled, disabled_reason
            FROM search_schedules
            WHERE search_definition_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        for row in rows {
            let schedule = schedule_from_row(&row);
            out.entry(row.get("search_definition_id"))
                .or_default()
                .schedules
                .push(schedule);
        }

        Ok(out)
    }

    async fn write_children(
        tx: &mut Transaction<'_, Postgres>,
        definition_id: i64,
        draft: &SearchDefinitionDraft,
    ) -> Result<()> {
        for (idx, c) in draft.criteria.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO search_criteria
                    (search_definition_id, field_uid, operator, value, secondary_value,
                     include_empty, rank)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(definition_id)
            .bind(&c.field_uid)
            .bind(c.operator.code())
            .bind(&c.value)
            .bind(&c.secondary_value)
            .bind(c.include_empty)
            .bind(rank_or_position(c.rank, idx))
            .execute(&mut **tx)
            .await
            .map_err(crate::Error::Database)?;
        }

        for (idx, s) in draft.sort_keys.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sort_keys (search_definition_id, field_uid, rank, descending)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(definition_id)
            .bind(&s.field_uid)
            .bind(rank_or_position(s.rank, idx))
            .bind(s.descending)
            .execute(&mut **tx)
            .await
            .map_err(crate::Error::Database)?;
        }

        for (idx, col) in draft.columns.iter().enumerate() {
            let (field_uid, constant) = match &col.source {
                ColumnSource::FieldUid(uid) => (Some(uid.as_str()), None),
                ColumnSource::Constant(text) => (None, Some(text.as_str())),
            };
            sqlx::query(
                r#"
                INSERT INTO search_columns (search_definition_id, field_uid, constant, rank)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(definition_id)
            .bind(field_uid)
            .bind(constant)
            .bind(rank_or_position(col.rank, idx))
            .execute(&mut **tx)
            .await
            .map_err(crate::Error::Database)?;
        }

        Ok(())
    }

    /// Writes the user-editable part of each schedule. Run bookkeeping belongs
    /// to the runner and is left alone, except that re-enabling a disabled
    /// schedule starts its failure count over.
    async fn write_schedules(
        tx: &mut Transaction<'_, Postgres>,
        definition_id: i64,
        schedules: &[Schedule],
    ) -> Result<()> {
        let keep: Vec<i64> = schedules.iter().map(|s| s.id).filter(|id| *id > 0).collect();
        sqlx::query(
            "DELETE FROM search_schedules WHERE search_definition_id = $1 AND NOT (id = ANY($2))",
        )
        .bind(definition_id)
        .bind(&keep)
        .execute(&mut **tx)
        .await
        .map_err(crate::Error::Database)?;

        for s in schedules {
            let updated = if s.id > 0 {
                sqlx::query(
                    r#"
                    UPDATE search_schedules SET
                        destination = $3, run_monday = $4, run_tuesday = $5,
                        run_wednesday = $6, run_thursday = $7, run_friday = $8,
                        run_saturday = $9, run_sunday = $10, run_hour = $11,
                        consecutive_failure_count = CASE
                            WHEN disabled AND NOT $12 THEN 0
                            ELSE consecutive_failure_count
                        END,
                        disabled_reason = CASE WHEN $12 THEN disabled_reason ELSE NULL END,
                        disabled = $12
                    WHERE id = $1 AND search_definition_id = $2
                    "#,
                )
                .bind(s.id)
                .bind(definition_id)
                .bind(Json(&s.destination))
                .bind(s.run_monday)
                .bind(s.run_tuesday)
                .bind(s.run_wednesday)
                .bind(s.run_thursday)
                .bind(s.run_friday)
                .bind(s.run_saturday)
                .bind(s.run_sunday)
                .bind(i16::from(s.run_hour))
                .bind(s.disabled)
                .execute(&mut **tx)
                .await
                .map_err(crate::Error::Database)?
                .rows_affected()
                    > 0
            } else {
                false
            };

            if !updated {
                sqlx::query(
                    r#"
                    INSERT INTO search_schedules
                        (search_definition_id, destination, run_monday, run_tuesday,
                         run_wednesday, run_thursday, run_friday, run_saturday, run_sunday,
                         run_hour, consecutive_failure_count, disabled)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, $11)
                    "#,
                )
                .bind(definition_id)
                .bind(Json(&s.destination))
                .bind(s.run_monday)
                .bind(s.run_tuesday)
                .bind(s.run_wednesday)
                .bind(s.run_thursday)
                .bind(s.run_friday)
                .bind(s.run_saturday)
                .bind(s.run_sunday)
                .bind(i16::from(s.run_hour))
                .bind(s.disabled)
                .execute(&mut **tx)
                .await
                .map_err(crate::Error::Database)?;
            }
        }
        Ok(())
    }

    async fn require(&self, id: i64) -> Result<SearchDefinition> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("search definition {id}")))
    }
}

fn rank_or_position(rank: i32, idx: usize) -> i32 {
    if rank != 0 {
        rank
    } else {
        i32::try_from(idx).unwrap_or(i32::MAX)
    }
}

fn schedule_from_row(row: &sqlx::postgres::PgRow) -> Schedule {
    let destination: Json<Destination> = row.get("destination");
    let fired_date: Option<NaiveDate> = row.get("last_fired_date");
    let fired_hour: Option<i16> = row.get("last_fired_hour");
    let run_hour: i16 = row.get("run_hour");
    Schedule {
        id: row.get("id"),
        destination: destination.0,
        run_monday: row.get("run_monday"),
        run_tuesday: row.get("run_tuesday"),
        run_wednesday: row.get("run_wednesday"),
        run_thursday: row.get("run_thursday"),
        run_friday: row.get("run_friday"),
        run_saturday: row.get("run_saturday"),
        run_sunday: row.get("run_sunday"),
        run_hour: u8::try_from(run_hour).unwrap_or(0),
        last_run_at: row.get("last_run_at"),
        last_fired_window: match (fired_date, fired_hour) {
            (Some(date), Some(hour)) => Some(RunWindow {
                date,
                hour: u8::try_from(hour).unwrap_or(0),
            }),
            _ => None,
        },
        consecutive_failure_count: row.get("consecutive_failure_count"),
        disabled: row.get("disabled"),
        disabled_reason: row.get("disabled_reason"),
    }
}

#[async_trait]
impl DefinitionStore for PgDefinitionStore {
    async fn insert(
        &self,
        user_id: i64,
        locked: bool,
        draft: &SearchDefinitionDraft,
    ) -> Result<SearchDefinition> {
        let mut tx = self.pool.begin().await.map_err(crate::Error::Database)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO search_definitions
                (user_id, module, name, locked, include_links, no_time, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(draft.module.as_str())
        .bind(&draft.name)
        .bind(locked)
        .bind(draft.include_links)
        .bind(draft.no_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(crate::Error::Database)?;

        Self::write_children(&mut tx, id, draft).await?;
        let fresh: Vec<Schedule> = draft
            .schedules
            .iter()
            .cloned()
            .map(|mut s| {
                s.id = 0;
                s
            })
            .collect();
        Self::write_schedules(&mut tx, id, &fresh).await?;

        tx.commit().await.map_err(crate::Error::Database)?;
        self.require(id).await
    }

    async fn update(&self, id: i64, draft: &SearchDefinitionDraft) -> Result<SearchDefinition> {
        let mut tx = self.pool.begin().await.map_err(crate::Error::Database)?;

        let result = sqlx::query(
            r#"
            UPDATE search_definitions
            SET module = $2, name = $3, include_links = $4, no_time = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(draft.module.as_str())
        .bind(&draft.name)
        .bind(draft.include_links)
        .bind(draft.no_time)
        .execute(&mut *tx)
        .await
        .map_err(crate::Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("search definition {id}")));
        }

        for kind in [ChildKind::Criterion, ChildKind::SortKey, ChildKind::Column] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE search_definition_id = $1",
                kind.table()
            ))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(crate::Error::Database)?;
        }
        Self::write_children(&mut tx, id, draft).await?;
        Self::write_schedules(&mut tx, id, &draft.schedules).await?;

        tx.commit().await.map_err(crate::Error::Database)?;
        self.require(id).await
    }

    async fn get(&self, id: i64) -> Result<Option<SearchDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM search_definitions WHERE id = $1"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        Ok(self.hydrate(rows).await?.into_iter().next())
    }

    async fn list_for_user(
        &self,
        user_id: i64,
        module: Option<&ModuleId>,
    ) -> Result<Vec<SearchDefinition>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DEFINITION_COLUMNS} FROM search_definitions
            WHERE user_id = $1 AND ($2::text IS NULL OR module = $2)
            ORDER BY lower(name), id
            "#
        ))
        .bind(user_id)
        .bind(module.map(ModuleId::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        self.hydrate(rows).await
    }

    async fn name_taken(
        &self,
        user_id: i64,
        module: &ModuleId,
        name: &str,
        excluding: Option<i64>,
    ) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM search_definitions
                WHERE user_id = $1 AND module = $2 AND lower(name) = lower($3)
                  AND ($4::bigint IS NULL OR id <> $4)
            )
            "#,
        )
        .bind(user_id)
        .bind(module.as_str())
        .bind(name)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        Ok(taken)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        // Children cascade via foreign keys.
        let result = sqlx::query("DELETE FROM search_definitions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(crate::Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_child(
        &self,
        definition_id: i64,
        kind: ChildKind,
        child_id: i64,
    ) -> Result<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE id = $1 AND search_definition_id = $2",
            kind.table()
        ))
        .bind(child_id)
        .bind(definition_id)
        .execute(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ScheduleStore for PgDefinitionStore {
    async fn scheduled_definitions(&self) -> Result<Vec<SearchDefinition>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DEFINITION_COLUMNS} FROM search_definitions d
            WHERE EXISTS (
                SELECT 1 FROM search_schedules s
                WHERE s.search_definition_id = d.id AND s.disabled = FALSE
            )
            ORDER BY id
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        self.hydrate(rows).await
    }

    async fn claim_window(&self, schedule_id: i64, window: RunWindow) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_schedules
            SET last_fired_date = $2, last_fired_hour = $3
            WHERE id = $1 AND disabled = FALSE
              AND (last_fired_date IS DISTINCT FROM $2 OR last_fired_hour IS DISTINCT FROM $3)
            "#,
        )
        .bind(schedule_id)
        .bind(window.date)
        .bind(i16::from(window.hour))
        .execute(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_success(&self, schedule_id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE search_schedules
            SET consecutive_failure_count = 0, last_run_at = $2
            WHERE id = $1
            "#,
        )
        .bind(schedule_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(crate::Error::Database)?;
        Ok(())
    }

    async fn record_failure(
        &self,
        schedule_id: i64,
        reason: &str,
        threshold: i32,
    ) -> Result<FailureOutcome> {
        let row = sqlx::query(
            r#"
            WITH prev AS (
                SELECT id, disabled FROM search_schedules WHERE id = $1 FOR UPDATE
            )
            UPDATE search_schedules s
            SET consecutive_failure_count = s.consecutive_failure_count + 1,
                disabled = s.disabled OR s.consecutive_failure_count + 1 >= $2,
                disabled_reason = CASE
                    WHEN NOT s.disabled AND s.consecutive_failure_count + 1 >= $2 THEN $3
                    ELSE s.disabled_reason
                END
            FROM prev
            WHERE s.id = prev.id
            RETURNING s.consecutive_failure_count, s.disabled, prev.disabled AS was_disabled
            "#,
        )
        .bind(schedule_id)
        .bind(threshold)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("schedule {schedule_id}")))?;

        let disabled: bool = row.get("disabled");
        let was_disabled: bool = row.get("was_disabled");
        Ok(FailureOutcome {
            consecutive_failures: row.get("consecutive_failure_count"),
            disabled_now: disabled && !was_disabled,
        })
    }
}

/// In-process store for embedders without PostgreSQL and for tests.
#[derive(Default)]
pub struct MemoryDefinitionStore {
    state: RwLock<MemoryDefinitions>,
}

#[derive(Default)]
struct MemoryDefinitions {
    next_id: i64,
    definitions: BTreeMap<i64, SearchDefinition>,
}

impl MemoryDefinitions {
    fn next(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn assign_children(&mut self, draft: &SearchDefinitionDraft, existing: &[Schedule]) -> Children {
        let criteria = draft
            .criteria
            .iter()
            .enumerate()
            .map(|(idx, c)| Criterion {
                id: self.next(),
                rank: rank_or_position(c.rank, idx),
                ..c.clone()
            })
            .collect();
        let sort_keys = draft
            .sort_keys
            .iter()
            .enumerate()
            .map(|(idx, s)| SortKey {
                id: self.next(),
                rank: rank_or_position(s.rank, idx),
                ..s.clone()
            })
            .collect();
        let columns = draft
            .columns
            .iter()
            .enumerate()
            .map(|(idx, c)| Column {
                id: self.next(),
                rank: rank_or_position(c.rank, idx),
                ..c.clone()
            })
            .collect();
        let schedules = draft
            .schedules
            .iter()
            .map(|s| {
                let mut s = s.clone();
                match existing.iter().find(|e| s.id > 0 && e.id == s.id) {
                    Some(stored) => s.carry_run_state_from(stored),
                    None => {
                        s.id = self.next();
                        s.clear_run_state();
                    }
                }
                s
            })
            .collect();
        Children {
            criteria,
            sort_keys,
            columns,
            schedules,
        }
    }

    fn schedule_mut(&mut self, schedule_id: i64) -> Option<&mut Schedule> {
        self.definitions
            .values_mut()
            .flat_map(|d| d.schedules.iter_mut())
            .find(|s| s.id == schedule_id)
    }
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn insert(
        &self,
        user_id: i64,
        locked: bool,
        draft: &SearchDefinitionDraft,
    ) -> Result<SearchDefinition> {
        let mut state = self.state.write().await;
        let id = state.next();
        let kids = state.assign_children(draft, &[]);
        let now = Utc::now();
        let def = SearchDefinition {
            id,
            user_id,
            module: draft.module.clone(),
            name: draft.name.clone(),
            criteria: kids.criteria,
            sort_keys: kids.sort_keys,
            columns: kids.columns,
            schedules: kids.schedules,
            locked,
            include_links: draft.include_links,
            no_time: draft.no_time,
            created_at: now,
            updated_at: now,
        };
        state.definitions.insert(id, def.clone());
        Ok(def)
    }

    async fn update(&self, id: i64, draft: &SearchDefinitionDraft) -> Result<SearchDefinition> {
        let mut state = self.state.write().await;
        let existing = state
            .definitions
            .get(&id)
            .map(|d| d.schedules.clone())
            .ok_or_else(|| Error::NotFound(format!("search definition {id}")))?;
        let kids = state.assign_children(draft, &existing);
        let def = state
            .definitions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("search definition {id}")))?;
        def.module = draft.module.clone();
        def.name = draft.name.clone();
        def.include_links = draft.include_links;
        def.no_time = draft.no_time;
        def.criteria = kids.criteria;
        def.sort_keys = kids.sort_keys;
        def.columns = kids.columns;
        def.schedules = kids.schedules;
        def.updated_at = Utc::now();
        Ok(def.clone())
    }

    async fn get(&self, id: i64) -> Result<Option<SearchDefinition>> {
        Ok(self.state.read().await.definitions.get(&id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: i64,
        module: Option<&ModuleId>,
    ) -> Result<Vec<SearchDefinition>> {
        let state = self.state.read().await;
        let mut out: Vec<SearchDefinition> = state
            .definitions
            .values()
            .filter(|d| d.user_id == user_id && module.map_or(true, |m| &d.module == m))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then(a.id.cmp(&b.id))
        });
        Ok(out)
    }

    async fn name_taken(
        &self,
        user_id: i64,
        module: &ModuleId,
        name: &str,
        excluding: Option<i64>,
    ) -> Result<bool> {
        let wanted = name.to_lowercase();
        Ok(self.state.read().await.definitions.values().any(|d| {
            d.user_id == user_id
                && &d.module == module
                && d.name.to_lowercase() == wanted
                && Some(d.id) != excluding
        }))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.state.write().await.definitions.remove(&id).is_some())
    }

    async fn delete_child(
        &self,
        definition_id: i64,
        kind: ChildKind,
        child_id: i64,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(def) = state.definitions.get_mut(&definition_id) else {
            return Ok(false);
        };
        let before = match kind {
            ChildKind::Criterion => def.criteria.len(),
            ChildKind::SortKey => def.sort_keys.len(),
            ChildKind::Column => def.columns.len(),
            ChildKind::Schedule => def.schedules.len(),
        };
        let after = match kind {
            ChildKind::Criterion => {
                def.criteria.retain(|c| c.id != child_id);
                def.criteria.len()
            }
            ChildKind::SortKey => {
                def.sort_keys.retain(|c| c.id != child_id);
                def.sort_keys.len()
            }
            ChildKind::Column => {
                def.columns.retain(|c| c.id != child_id);
                def.columns.len()
            }
            ChildKind::Schedule => {
                def.schedules.retain(|c| c.id != child_id);
                def.schedules.len()
            }
        };
        Ok(after < before)
    }
}

#[async_trait]
impl ScheduleStore for MemoryDefinitionStore {
    async fn scheduled_definitions(&self) -> Result<Vec<SearchDefinition>> {
        Ok(self
            .state
            .read()
            .await
            .definitions
            .values()
            .filter(|d| d.schedules.iter().any(|s| !s.disabled))
            .cloned()
            .collect())
    }

    async fn claim_window(&self, schedule_id: i64, window: RunWindow) -> Result<bool> {
        let mut state = self.state.write().await;
        let schedule = state
            .schedule_mut(schedule_id)
            .ok_or_else(|| Error::NotFound(format!("schedule {schedule_id}")))?;
        if schedule.disabled || schedule.last_fired_window == Some(window) {
            return Ok(false);
        }
        schedule.last_fired_window = Some(window);
        Ok(true)
    }

    async fn record_success(&self, schedule_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let schedule = state
            .schedule_mut(schedule_id)
            .ok_or_else(|| Error::NotFound(format!("schedule {schedule_id}")))?;
        schedule.consecutive_failure_count = 0;
        schedule.last_run_at = Some(at);
        Ok(())
    }

    async fn record_failure(
        &self,
        schedule_id: i64,
        reason: &str,
        threshold: i32,
    ) -> Result<FailureOutcome> {
        let mut state = self.state.write().await;
        let schedule = state
            .schedule_mut(schedule_id)
            .ok_or_else(|| Error::NotFound(format!("schedule {schedule_id}")))?;
        schedule.consecutive_failure_count += 1;
        let was_disabled = schedule.disabled;
        if !was_disabled && schedule.consecutive_failure_count >= threshold {
            schedule.disabled = true;
            schedule.disabled_reason = Some(reason.to_string());
        }
        Ok(FailureOutcome {
            consecutive_failures: schedule.consecutive_failure_count,
            disabled_now: schedule.disabled && !was_disabled,
        })
    }
}
