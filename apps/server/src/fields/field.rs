//! Virtual field descriptors

use crate::db::search::ValueRef;
use crate::models::{DataType, ModuleId, User};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Prefix of custom field uids; the rest is the custom definition id.
pub const CUSTOM_UID_PREFIX: &str = "*cf_";

pub fn custom_uid(definition_id: i64) -> String {
    format!("{CUSTOM_UID_PREFIX}{definition_id}")
}

/// Definition id of a custom field uid, if `uid` has the custom form.
pub fn parse_custom_uid(uid: &str) -> Option<i64> {
    uid.strip_prefix(CUSTOM_UID_PREFIX)?.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Native { column: String },
    Custom { definition_id: i64 },
}

/// Who may see (and therefore search, sort or display) a field.
#[derive(Clone)]
pub enum Visibility {
    Everyone,
    Permission(String),
    Admin,
    Rule(Arc<dyn Fn(&User) -> bool + Send + Sync>),
}

impl Visibility {
    pub fn rule<F>(f: F) -> Self
    where
        F: Fn(&User) -> bool + Send + Sync + 'static,
    {
        Self::Rule(Arc::new(f))
    }

    pub fn allows(&self, user: &User) -> bool {
        match self {
            Self::Everyone => true,
            Self::Permission(name) => user.has_permission(name),
            Self::Admin => user.admin || user.sys_admin,
            Self::Rule(rule) => rule(user),
        }
    }
}

impl fmt::Debug for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Everyone => f.write_str("Everyone"),
            Self::Permission(p) => f.debug_tuple("Permission").field(p).finish(),
            Self::Admin => f.write_str("Admin"),
            Self::Rule(_) => f.write_str("Rule(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub uid: String,
    pub module: ModuleId,
    pub label: String,
    pub data_type: DataType,
    pub source: FieldSource,
    pub visibility: Visibility,
    /// Included in quick (single text box) searches.
    pub quick_searchable: bool,
}

impl Field {
    pub fn native(
        module: impl Into<ModuleId>,
        uid: impl Into<String>,
        label: impl Into<String>,
        data_type: DataType,
        column: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            module: module.into(),
            label: label.into(),
            data_type,
            source: FieldSource::Native {
                column: column.into(),
            },
            visibility: Visibility::Everyone,
            quick_searchable: false,
        }
    }

    pub fn visible_to(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn quick_searchable(mut self) -> Self {
        self.quick_searchable = true;
        self
    }

    pub fn is_visible_to(&self, user: &User) -> bool {
        self.visibility.allows(user)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.source, FieldSource::Custom { .. })
    }

    /// How predicates read this field.
    pub fn value_ref(&self) -> ValueRef {
        match &self.source {
            FieldSource::Native { column } => ValueRef::Column {
                column: column.clone(),
                data_type: self.data_type,
            },
            FieldSource::Custom { definition_id } => ValueRef::Custom {
                definition_id: *definition_id,
                data_type: self.data_type,
            },
        }
    }

    pub fn summary(&self) -> FieldSummary {
        FieldSummary {
            uid: self.uid.clone(),
            label: self.label.clone(),
            data_type: self.data_type,
            custom: self.is_custom(),
            quick_searchable: self.quick_searchable,
        }
    }
}

/// Serializable view of a field for API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSummary {
    pub uid: String,
    pub label: String,
    pub data_type: DataType,
    pub custom: bool,
    pub quick_searchable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn user() -> User {
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
            permissions: BTreeSet::from(["view_costs".to_string()]),
        }
    }

    #[test]
    fn custom_uids_round_trip_ids() {
        assert_eq!(custom_uid(42), "*cf_42");
        assert_eq!(parse_custom_uid("*cf_42"), Some(42));
        assert_eq!(parse_custom_uid("ord_num"), None);
        assert_eq!(parse_custom_uid("*cf_x"), None);
    }

    #[test]
    fn visibility_rules() {
        let u = user();
        assert!(Visibility::Everyone.allows(&u));
        assert!(Visibility::Permission("view_costs".into()).allows(&u));
        assert!(!Visibility::Permission("view_duty".into()).allows(&u));
        assert!(!Visibility::Admin.allows(&u));
        assert!(Visibility::rule(|u: &User| u.company_id == 1).allows(&u));
    }
}
