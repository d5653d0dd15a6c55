//! Module declarations and row-level security

use super::field::Field;
use crate::db::search::{CompareOp, Predicate, ValueRef};
use crate::models::{DataType, ModuleId, ScalarValue, User};
use std::fmt;
use std::sync::Arc;

/// Restricts the rows of a module a user may see. Applied to every query.
pub trait RowSecurity: Send + Sync {
    fn predicate(&self, user: &User) -> Predicate;
}

impl<F> RowSecurity for F
where
    F: Fn(&User) -> Predicate + Send + Sync,
{
    fn predicate(&self, user: &User) -> Predicate {
        self(user)
    }
}

/// Every row is visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl RowSecurity for Unrestricted {
    fn predicate(&self, _user: &User) -> Predicate {
        Predicate::True
    }
}

/// Rows whose company column equals the user's company. Users of the master
/// company see everything.
#[derive(Debug, Clone)]
pub struct CompanyScoped {
    pub column: String,
    pub master_company_id: Option<i64>,
}

impl CompanyScoped {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            master_company_id: None,
        }
    }

    pub fn with_master_company(mut self, company_id: i64) -> Self {
        self.master_company_id = Some(company_id);
        self
    }
}

impl RowSecurity for CompanyScoped {
    fn predicate(&self, user: &User) -> Predicate {
        if self.master_company_id == Some(user.company_id) {
            return Predicate::True;
        }
        Predicate::compare(
            ValueRef::Column {
                column: self.column.clone(),
                data_type: DataType::Integer,
            },
            CompareOp::Eq,
            ScalarValue::Integer(user.company_id),
        )
    }
}

/// A searchable entity type.
#[derive(Clone)]
pub struct ModuleDef {
    pub id: ModuleId,
    pub label: String,
    pub table: String,
    pub id_column: String,
    /// Native fields in display order.
    pub fields: Vec<Field>,
    /// Refuse queries with no criteria.
    pub requires_criterion: bool,
    /// Admins skip `row_security` when set.
    pub admins_bypass_row_security: bool,
    pub row_security: Arc<dyn RowSecurity>,
    /// Path of a record's page relative to the link base url; `{id}` is replaced.
    pub link_path: String,
}

impl ModuleDef {
    pub fn new(id: impl Into<ModuleId>, label: impl Into<String>, table: impl Into<String>) -> Self {
        let id = id.into();
        let link_path = format!("/{}/{{id}}", id.as_str());
        Self {
            id,
            label: label.into(),
            table: table.into(),
            id_column: "id".to_string(),
            fields: Vec::new(),
            requires_criterion: false,
            admins_bypass_row_security: false,
            row_security: Arc::new(Unrestricted),
            link_path,
        }
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// Add a native field; its module is set to this module.
    pub fn field(mut self, mut field: Field) -> Self {
        field.module = self.id.clone();
        self.fields.push(field);
        self
    }

    pub fn requires_criterion(mut self, required: bool) -> Self {
        self.requires_criterion = required;
        self
    }

    pub fn admins_bypass_row_security(mut self, bypass: bool) -> Self {
        self.admins_bypass_row_security = bypass;
        self
    }

    pub fn row_security(mut self, security: impl RowSecurity + 'static) -> Self {
        self.row_security = Arc::new(security);
        self
    }

    pub fn link_path(mut self, path: impl Into<String>) -> Self {
        self.link_path = path.into();
        self
    }

    /// Row restriction for `user`, honouring the admin exemption flag.
    pub fn security_predicate(&self, user: &User) -> Predicate {
        if self.admins_bypass_row_security && (user.admin || user.sys_admin) {
            Predicate::True
        } else {
            self.row_security.predicate(user)
        }
    }

    pub fn record_link(&self, base_url: &str, id: i64) -> String {
        format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            self.link_path.replace("{id}", &id.to_string())
        )
    }
}

impl fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDef")
            .field("id", &self.id)
            .field("table", &self.table)
            .field("id_column", &self.id_column)
            .field("fields", &self.fields.len())
            .field("requires_criterion", &self.requires_criterion)
            .field("admins_bypass_row_security", &self.admins_bypass_row_security)
            .finish()
    }
}
