//! Virtual field registry
//!
//! Modules declare native fields statically; custom fields come from a
//! [`CustomFieldStore`] and are merged in at lookup time.

mod catalog;
mod custom;
mod field;
mod module;
mod registry;

pub use catalog::{build_modules, FieldConfig, ModuleConfig};
pub use custom::{
    CustomFieldDefinition, CustomFieldStore, CustomFieldVersion, MemoryCustomFieldStore,
    PgCustomFieldStore,
};
pub use field::{
    custom_uid, parse_custom_uid, Field, FieldSource, FieldSummary, Visibility, CUSTOM_UID_PREFIX,
};
pub use module::{CompanyScoped, ModuleDef, RowSecurity, Unrestricted};
pub use registry::FieldRegistry;
