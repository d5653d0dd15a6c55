//! Database layer - stores, query execution and search compilation

pub mod datastore;
pub mod definitions;
pub mod locks;
pub mod memory;
pub mod runs;
pub mod search;
pub mod users;

pub use datastore::{Cell, Datastore, PgDatastore, Query, Row};
pub use definitions::{
    ChildKind, DefinitionStore, FailureOutcome, MemoryDefinitionStore, PgDefinitionStore,
    ScheduleStore,
};
pub use locks::{MemoryScheduleLocks, PgScheduleLocks, ScheduleLockGuard, ScheduleLocks};
pub use memory::{MemoryDatastore, MemoryRecord};
pub use runs::{MemorySearchRunStore, PgSearchRunStore, SearchRunStore};
pub use users::{MemoryUserDirectory, PgUserDirectory, UserDirectory};
