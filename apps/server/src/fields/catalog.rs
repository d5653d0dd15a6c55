//! Module declarations loaded from configuration
//!
//! ```toml
//! [[modules]]
//! id = "order"
//! label = "Order"
//! table = "orders"
//! company_column = "importer_id"
//! requires_criterion = true
//!
//! [[modules.fields]]
//! uid = "ord_ord_num"
//! label = "Order Number"
//! data_type = "string"
//! column = "order_number"
//! quick_searchable = true
//! ```

use super::field::{Field, Visibility};
use super::module::{CompanyScoped, ModuleDef};
use crate::models::DataType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: String,
    pub label: String,
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Rows are restricted to the user's company through this column. Every
    /// row is visible when unset.
    #[serde(default)]
    pub company_column: Option<String>,
    #[serde(default)]
    pub requires_criterion: bool,
    #[serde(default)]
    pub admins_bypass_row_security: bool,
    #[serde(default)]
    pub link_path: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub uid: String,
    pub label: String,
    pub data_type: DataType,
    pub column: String,
    /// Permission required to see the field.
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub admin_only: bool,
    #[serde(default)]
    pub quick_searchable: bool,
}

fn default_id_column() -> String {
    "id".to_string()
}

impl ModuleConfig {
    /// `master_company_id` names the company whose users see every row.
    pub fn to_module_def(&self, master_company_id: Option<i64>) -> ModuleDef {
        let mut module = ModuleDef::new(self.id.as_str(), self.label.as_str(), self.table.as_str())
            .id_column(self.id_column.as_str())
            .requires_criterion(self.requires_criterion)
            .admins_bypass_row_security(self.admins_bypass_row_security);

        if let Some(column) = &self.company_column {
            let mut scope = CompanyScoped::new(column.as_str());
            if let Some(master) = master_company_id {
                scope = scope.with_master_company(master);
            }
            module = module.row_security(scope);
        }
        if let Some(path) = &self.link_path {
            module = module.link_path(path.as_str());
        }

        for field in &self.fields {
            module = module.field(field.to_field(&self.id));
        }
        module
    }
}

impl FieldConfig {
    fn to_field(&self, module: &str) -> Field {
        let visibility = if self.admin_only {
            Visibility::Admin
        } else if let Some(permission) = &self.permission {
            Visibility::Permission(permission.clone())
        } else {
            Visibility::Everyone
        };

        let field = Field::native(
            module,
            self.uid.as_str(),
            self.label.as_str(),
            self.data_type,
            self.column.as_str(),
        )
        .visible_to(visibility);
        if self.quick_searchable {
            field.quick_searchable()
        } else {
            field
        }
    }
}

pub fn build_modules(configs: &[ModuleConfig], master_company_id: Option<i64>) -> Vec<ModuleDef> {
    configs
        .iter()
        .map(|c| c.to_module_def(master_company_id))
        .collect()
}
