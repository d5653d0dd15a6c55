//! User-defined (custom) field definitions and their stores

use super::field::{custom_uid, Field, FieldSource, Visibility};
use crate::models::{DataType, ModuleId};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldDefinition {
    pub id: i64,
    pub module: ModuleId,
    pub label: String,
    pub data_type: DataType,
    pub quick_searchable: bool,
    /// Permission required to see the field; `None` means visible to everyone.
    pub read_permission: Option<String>,
}

impl CustomFieldDefinition {
    pub fn to_field(&self) -> Field {
        Field {
            uid: custom_uid(self.id),
            module: self.module.clone(),
            label: self.label.clone(),
            data_type: self.data_type,
            source: FieldSource::Custom {
                definition_id: self.id,
            },
            visibility: match &self.read_permission {
                Some(permission) => Visibility::Permission(permission.clone()),
                None => Visibility::Everyone,
            },
            quick_searchable: self.quick_searchable,
        }
    }
}

/// Opaque token that changes whenever any custom definition changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldVersion(pub String);

/// Source of custom field definitions.
#[async_trait]
pub trait CustomFieldStore: Send + Sync {
    /// Cheap staleness check.
    async fn last_modified(&self) -> Result<CustomFieldVersion>;

    async fn load_all(&self) -> Result<Vec<CustomFieldDefinition>>;
}

/// Reads `custom_definitions`.
#[derive(Clone)]
pub struct PgCustomFieldStore {
    pool: PgPool,
}

impl PgCustomFieldStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomFieldStore for PgCustomFieldStore {
    async fn last_modified(&self) -> Result<CustomFieldVersion> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n, MAX(updated_at) AS latest FROM custom_definitions",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        let count: i64 = row.get("n");
        let latest: Option<DateTime<Utc>> = row.get("latest");
        Ok(CustomFieldVersion(format!(
            "{}|{}",
            count,
            latest.map(|t| t.to_rfc3339()).unwrap_or_default()
        )))
    }

    async fn load_all(&self) -> Result<Vec<CustomFieldDefinition>> {
        let rows = sqlx::query(
            r#"
            SELECT id, module, label, data_type, quick_searchable, read_permission
            FROM custom_definitions
            ORDER BY module, rank, label, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let raw_type: String = row.get("data_type");
            let Ok(data_type) = raw_type.parse::<DataType>() else {
                tracing::warn!(
                    custom_definition_id = id,
                    data_type = %raw_type,
                    "Skipping custom field with unknown data type"
                );
                continue;
            };
            out.push(CustomFieldDefinition {
                id,
                module: ModuleId::new(row.get::<String, _>("module")),
                label: row.get("label"),
                data_type,
                quick_searchable: row.get("quick_searchable"),
                read_permission: row.get("read_permission"),
            });
        }
        Ok(out)
    }
}

/// In-process store, used when custom fields are managed by the embedding
/// application and in tests.
#[derive(Default)]
pub struct MemoryCustomFieldStore {
    definitions: RwLock<Vec<CustomFieldDefinition>>,
    revision: AtomicU64,
    loads: AtomicU64,
}

impl MemoryCustomFieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id.
    pub async fn upsert(&self, definition: CustomFieldDefinition) {
        let mut defs = self.definitions.write().await;
        match defs.iter_mut().find(|d| d.id == definition.id) {
            Some(existing) => *existing = definition,
            None => defs.push(definition),
        }
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn remove(&self, id: i64) {
        self.definitions.write().await.retain(|d| d.id != id);
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of full loads served.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CustomFieldStore for MemoryCustomFieldStore {
    async fn last_modified(&self) -> Result<CustomFieldVersion> {
        Ok(CustomFieldVersion(
            self.revision.load(Ordering::SeqCst).to_string(),
        ))
    }

    async fn load_all(&self) -> Result<Vec<CustomFieldDefinition>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.definitions.read().await.clone())
    }
}
