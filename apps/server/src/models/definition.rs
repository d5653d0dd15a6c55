//! Persisted search definition aggregate and its children

use crate::db::search::Operator;
use crate::models::{ModuleId, Schedule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One predicate of a search definition. Sibling criteria are ANDed in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(default)]
    pub id: i64,
    pub field_uid: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: String,
    /// Upper bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_value: Option<String>,
    /// Treat NULL / blank values as matching.
    #[serde(default)]
    pub include_empty: bool,
    #[serde(default)]
    pub rank: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    #[serde(default)]
    pub id: i64,
    pub field_uid: String,
    #[serde(default)]
    pub rank: i32,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSource {
    FieldUid(String),
    /// Literal printed in every row.
    Constant(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    #[serde(default)]
    pub id: i64,
    #[serde(flatten)]
    pub source: ColumnSource,
    #[serde(default)]
    pub rank: i32,
}

impl Column {
    pub fn field_uid(&self) -> Option<&str> {
        match &self.source {
            ColumnSource::FieldUid(uid) => Some(uid.as_str()),
            ColumnSource::Constant(_) => None,
        }
    }
}

/// A user-owned saved search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDefinition {
    pub id: i64,
    pub user_id: i64,
    pub module: ModuleId,
    pub name: String,
    pub criteria: Vec<Criterion>,
    pub sort_keys: Vec<SortKey>,
    pub columns: Vec<Column>,
    pub schedules: Vec<Schedule>,
    /// Owned by an integration identity; not editable by users.
    pub locked: bool,
    pub include_links: bool,
    /// Render datetimes without their time component.
    pub no_time: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchDefinition {
    pub fn criteria_by_rank(&self) -> Vec<&Criterion> {
        let mut out: Vec<&Criterion> = self.criteria.iter().collect();
        out.sort_by_key(|c| (c.rank, c.id));
        out
    }

    pub fn sort_keys_by_rank(&self) -> Vec<&SortKey> {
        let mut out: Vec<&SortKey> = self.sort_keys.iter().collect();
        out.sort_by_key(|s| (s.rank, s.id));
        out
    }

    pub fn columns_by_rank(&self) -> Vec<&Column> {
        let mut out: Vec<&Column> = self.columns.iter().collect();
        out.sort_by_key(|c| (c.rank, c.id));
        out
    }

    pub fn schedule(&self, schedule_id: i64) -> Option<&Schedule> {
        self.schedules.iter().find(|s| s.id == schedule_id)
    }

    /// Copy with transfer passwords removed.
    pub fn redacted(&self) -> SearchDefinition {
        SearchDefinition {
            schedules: self.schedules.iter().map(Schedule::redacted).collect(),
            ..self.clone()
        }
    }
}

/// Create/update payload. Child ids are ignored except for schedules, where an id
/// matching an existing schedule keeps that schedule's run history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchDefinitionDraft {
    pub module: ModuleId,
    pub name: String,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub sort_keys: Vec<SortKey>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub include_links: bool,
    #[serde(default)]
    pub no_time: bool,
}

impl SearchDefinitionDraft {
    pub fn from_definition(def: &SearchDefinition) -> Self {
        Self {
            module: def.module.clone(),
            name: def.name.clone(),
            criteria: def.criteria.clone(),
            sort_keys: def.sort_keys.clone(),
            columns: def.columns.clone(),
            schedules: def.schedules.clone(),
            include_links: def.include_links,
            no_time: def.no_time,
        }
    }
}

/// What a search run caches results for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum RunTarget {
    Definition(i64),
    /// One-off query object, e.g. the implicit search behind an uploaded file.
    AdHoc(String),
}

impl RunTarget {
    /// Stable storage key.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Definition(id) => format!("definition:{id}"),
            Self::AdHoc(key) => format!("adhoc:{key}"),
        }
    }
}

/// Pagination bookkeeping for one (target, user) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRun {
    pub id: i64,
    pub target: RunTarget,
    pub user_id: i64,
    pub page: u32,
    pub per_page: u32,
    pub last_accessed: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_source_serializes_flat() {
        let col = Column {
            id: 0,
            source: ColumnSource::Constant("ACME".into()),
            rank: 2,
        };
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["constant"], "ACME");
        assert_eq!(json["rank"], 2);
        assert!(col.field_uid().is_none());
    }

    #[test]
    fn children_are_ordered_by_rank_then_id() {
        let now = Utc::now();
        let def = SearchDefinition {
            id: 1,
            user_id: 1,
            module: ModuleId::new("order"),
            name: "x".into(),
            criteria: vec![],
            sort_keys: vec![
                SortKey {
                    id: 5,
                    field_uid: "b".into(),
                    rank: 1,
                    descending: false,
                },
                SortKey {
                    id: 3,
                    field_uid: "a".into(),
                    rank: 1,
                    descending: true,
                },
                SortKey {
                    id: 9,
                    field_uid: "c".into(),
                    rank: 0,
                    descending: false,
                },
            ],
            columns: vec![],
            schedules: vec![],
            locked: false,
            include_links: false,
            no_time: false,
            created_at: now,
            updated_at: now,
        };
        let uids: Vec<&str> = def
            .sort_keys_by_rank()
            .iter()
            .map(|s| s.field_uid.as_str())
            .collect();
        assert_eq!(uids, vec!["c", "a", "b"]);
    }

    #[test]
    fn run_target_storage_keys_are_distinct() {
        assert_eq!(RunTarget::Definition(7).storage_key(), "definition:7");
        assert_eq!(
            RunTarget::AdHoc("imported_file:7".into()).storage_key(),
            "adhoc:imported_file:7"
        );
    }
}
