//! Domain models for the search engine

pub mod definition;
pub mod schedule;
pub mod user;
pub mod value;

pub use definition::{
    Column, ColumnSource, Criterion, RunTarget, SearchDefinition, SearchDefinitionDraft,
    SearchRun, SortKey,
};
pub use schedule::{Destination, FileTransferTarget, RunWindow, Schedule, TransferProtocol};
pub use user::User;
pub use value::{DataType, ParseDataTypeError, ScalarValue};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a module (entity type exposing a field set), e.g. `order`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
