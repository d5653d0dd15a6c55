//! Field registry: native fields per module plus cached custom fields

use super::custom::{CustomFieldStore, CustomFieldVersion};
use super::field::{parse_custom_uid, Field, CUSTOM_UID_PREFIX};
use super::module::ModuleDef;
use crate::error::CompileError;
use crate::models::{ModuleId, User};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct CustomSnapshot {
    version: CustomFieldVersion,
    by_module: HashMap<ModuleId, Vec<Arc<Field>>>,
    by_uid: HashMap<String, Arc<Field>>,
}

/// Process-wide registry of modules and their fields.
///
/// Native fields are fixed at construction. Custom fields are loaded from the
/// [`CustomFieldStore`] on first use and reloaded whenever the store's version
/// token changes or [`FieldRegistry::invalidate`] is called.
pub struct FieldRegistry {
    modules: Vec<Arc<ModuleDef>>,
    module_index: HashMap<ModuleId, usize>,
    native_by_module: HashMap<ModuleId, Vec<Arc<Field>>>,
    native_by_uid: HashMap<String, Arc<Field>>,
    custom_store: Arc<dyn CustomFieldStore>,
    custom: RwLock<Option<Arc<CustomSnapshot>>>,
}

impl FieldRegistry {
    pub fn new(modules: Vec<ModuleDef>, custom_store: Arc<dyn CustomFieldStore>) -> Result<Self> {
        let mut registry = Self {
            modules: Vec::with_capacity(modules.len()),
            module_index: HashMap::new(),
            native_by_module: HashMap::new(),
            native_by_uid: HashMap::new(),
            custom_store,
            custom: RwLock::new(None),
        };

        for module in modules {
            if registry.module_index.contains_key(&module.id) {
                return Err(Error::Validation(format!(
                    "module '{}' registered twice",
                    module.id
                )));
            }
            let mut fields = Vec::with_capacity(module.fields.len());
            for field in &module.fields {
                if field.uid.starts_with(CUSTOM_UID_PREFIX) {
                    return Err(Error::Validation(format!(
                        "native field uid '{}' uses the custom prefix",
                        field.uid
                    )));
                }
                let field = Arc::new(field.clone());
                if registry
                    .native_by_uid
                    .insert(field.uid.clone(), field.clone())
                    .is_some()
                {
                    return Err(Error::Validation(format!(
                        "field uid '{}' registered twice",
                        field.uid
                    )));
                }
                fields.push(field);
            }
            registry
                .native_by_module
                .insert(module.id.clone(), fields);
            registry
                .module_index
                .insert(module.id.clone(), registry.modules.len());
            registry.modules.push(Arc::new(module));
        }

        Ok(registry)
    }

    pub fn modules(&self) -> &[Arc<ModuleDef>] {
        &self.modules
    }

    pub fn module(&self, id: &ModuleId) -> Result<Arc<ModuleDef>> {
        self.module_index
            .get(id)
            .map(|idx| self.modules[*idx].clone())
            .ok_or_else(|| Error::NotFound(format!("module {id}")))
    }

    /// Fields of `module` visible to `user`: native fields in declaration order,
    /// then custom fields.
    pub async fn fields_for(&self, module: &ModuleId, user: &User) -> Result<Vec<Arc<Field>>> {
        self.module(module)?;
        let custom = self.custom_snapshot().await?;

        let native = self
            .native_by_module
            .get(module)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let extra = custom
            .by_module
            .get(module)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(native
            .iter()
            .chain(extra.iter())
            .filter(|f| f.is_visible_to(user))
            .cloned()
            .collect())
    }

    /// Visible fields flagged for quick search.
    pub async fn quick_search_fields(
        &self,
        module: &ModuleId,
        user: &User,
    ) -> Result<Vec<Arc<Field>>> {
        Ok(self
            .fields_for(module, user)
            .await?
            .into_iter()
            .filter(|f| f.quick_searchable)
            .collect())
    }

    /// Look a field up by uid regardless of visibility.
    pub async fn find(&self, uid: &str) -> Result<Arc<Field>> {
        if let Some(field) = self.native_by_uid.get(uid) {
            return Ok(field.clone());
        }
        if parse_custom_uid(uid).is_some() {
            let custom = self.custom_snapshot().await?;
            if let Some(field) = custom.by_uid.get(uid) {
                return Ok(field.clone());
            }
        }
        Err(CompileError::UnknownField {
            uid: uid.to_string(),
        }
        .into())
    }

    /// Like [`find`](Self::find) but the field must belong to `module`.
    pub async fn find_in(&self, module: &ModuleId, uid: &str) -> Result<Arc<Field>> {
        let field = self.find(uid).await?;
        if &field.module != module {
            return Err(CompileError::UnknownField {
                uid: uid.to_string(),
            }
            .into());
        }
        Ok(field)
    }

    /// Display label for a uid. Blank or unknown uids yield an empty string.
    pub async fn label_for(&self, uid: Option<&str>) -> String {
        let Some(uid) = uid.map(str::trim).filter(|u| !u.is_empty()) else {
            return String::new();
        };
        match self.find(uid).await {
            Ok(field) => field.label.clone(),
            Err(e) => {
                tracing::debug!(uid = %uid, error = %e, "No label for field uid");
                String::new()
            }
        }
    }

    /// Drop cached custom fields; the next lookup reloads them.
    pub async fn invalidate(&self) {
        *self.custom.write().await = None;
        tracing::debug!("Custom field cache invalidated");
    }

    async fn custom_snapshot(&self) -> Result<Arc<CustomSnapshot>> {
        let version = self.custom_store.last_modified().await?;
        {
            let guard = self.custom.read().await;
            if let Some(snapshot) = guard.as_ref() {
                if snapshot.version == version {
                    return Ok(snapshot.clone());
                }
            }
        }

        let mut guard = self.custom.write().await;
        if let Some(snapshot) = guard.as_ref() {
            if snapshot.version == version {
                return Ok(snapshot.clone());
            }
        }

        let definitions = self.custom_store.load_all().await?;
        let mut by_module: HashMap<ModuleId, Vec<Arc<Field>>> = HashMap::new();
        let mut by_uid = HashMap::with_capacity(definitions.len());
        for definition in &definitions {
            if !self.module_index.contains_key(&definition.module) {
                tracing::debug!(
                    custom_definition_id = definition.id,
                    module = %definition.module,
                    "Ignoring custom field for unregistered module"
                );
                continue;
            }
            let field = Arc::new(definition.to_field());
            by_uid.insert(field.uid.clone(), field.clone());
            by_module
                .entry(definition.module.clone())
                .or_default()
                .push(field);
        }

        tracing::debug!(
            custom_fields = by_uid.len(),
            version = %version.0,
            "Loaded custom fields"
        );

        let snapshot = Arc::new(CustomSnapshot {
            version,
            by_module,
            by_uid,
        });
        *guard = Some(snapshot.clone());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{CustomFieldDefinition, MemoryCustomFieldStore, Visibility};
    use crate::models::DataType;
    use std::collections::BTreeSet;

    fn user(permissions: &[&str]) -> User {
        User {
            id: 1,
            company_id: 1,
            username: "u".into(),
            full_name: String::new(),
            email: String::new(),
            time_zone: "UTC".into(),
            admin: false,
            sys_admin: false,
            system: false,
            permissions: permissions.iter().map(|p| p.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn order_module() -> ModuleDef {
        ModuleDef::new("order", "Order", "orders")
            .field(Field::native(
                "order",
                "ord_num",
                "Order Number",
                DataType::String,
                "order_number",
            ))
            .field(
                Field::native("order", "ord_cost", "Cost", DataType::Decimal, "cost")
                    .visible_to(Visibility::Permission("view_costs".into())),
            )
    }

    fn custom(id: i64, label: &str) -> CustomFieldDefinition {
        CustomFieldDefinition {
            id,
            module: ModuleId::new("order"),
            label: label.into(),
            data_type: DataType::String,
            quick_searchable: false,
            read_permission: None,
        }
    }

    #[tokio::test]
    async fn fields_for_filters_by_visibility_and_appends_custom() {
        let store = Arc::new(MemoryCustomFieldStore::new());
        store.upsert(custom(3, "Buyer")).await;
        let registry = FieldRegistry::new(vec![order_module()], store).unwrap();

        let uids: Vec<String> = registry
            .fields_for(&ModuleId::new("order"), &user(&[]))
            .await
            .unwrap()
            .iter()
            .map(|f| f.uid.clone())
            .collect();
        assert_eq!(uids, vec!["ord_num", "*cf_3"]);

        let with_costs = registry
            .fields_for(&ModuleId::new("order"), &user(&["view_costs"]))
            .await
            .unwrap();
        assert_eq!(with_costs.len(), 3);
    }

    #[tokio::test]
    async fn custom_fields_reload_only_when_version_changes() {
        let store = Arc::new(MemoryCustomFieldStore::new());
        store.upsert(custom(3, "Buyer")).await;
        let registry = FieldRegistry::new(vec![order_module()], store.clone()).unwrap();

        registry.find("*cf_3").await.unwrap();
        registry.find("*cf_3").await.unwrap();
        assert_eq!(store.load_count(), 1);

        store.upsert(custom(3, "Buyer Name")).await;
        assert_eq!(registry.find("*cf_3").await.unwrap().label, "Buyer Name");
        assert_eq!(store.load_count(), 2);

        registry.invalidate().await;
        registry.find("*cf_3").await.unwrap();
        assert_eq!(store.load_count(), 3);
    }

    #[tokio::test]
    async fn unknown_uids_fail_lookup_but_not_labels() {
        let registry =
            FieldRegistry::new(vec![order_module()], Arc::new(MemoryCustomFieldStore::new()))
                .unwrap();
        let err = registry.find("nope").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Compile(CompileError::UnknownField { ref uid }) if uid == "nope"
        ));
        assert_eq!(registry.label_for(None).await, "");
        assert_eq!(registry.label_for(Some("  ")).await, "");
        assert_eq!(registry.label_for(Some("*cf_99")).await, "");
        assert_eq!(registry.label_for(Some("ord_num")).await, "Order Number");
    }

    #[tokio::test]
    async fn find_in_rejects_fields_of_other_modules() {
        let entry = ModuleDef::new("entry", "Entry", "entries").field(Field::native(
            "entry",
            "ent_num",
            "Entry Number",
            DataType::String,
            "entry_number",
        ));
        let registry = FieldRegistry::new(
            vec![order_module(), entry],
            Arc::new(MemoryCustomFieldStore::new()),
        )
        .unwrap();
        assert!(registry
            .find_in(&ModuleId::new("order"), "ent_num")
            .await
            .is_err());
    }

    #[test]
    fn duplicate_uids_are_rejected() {
        let dup = ModuleDef::new("other", "Other", "others").field(Field::native(
            "other",
            "ord_num",
            "Dup",
            DataType::String,
            "x",
        ));
        let result = FieldRegistry::new(
            vec![order_module(), dup],
            Arc::new(MemoryCustomFieldStore::new()),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
