//! Criterion compilation and secured query building

pub mod compiler;
mod describe;
pub(crate) mod escape;
pub mod operators;
pub mod predicate;
pub mod query_builder;

pub use compiler::{compile, compile_criterion, CompileContext};
pub use operators::Operator;
pub use predicate::{CompareOp, LikeKind, Predicate, RecordValues, SqlContext, ValueRef};
pub use query_builder::{
    BindValue, ColumnSpec, QueryScope, SecuredQuery, SecuredQueryBuilder, SortSpec, SqlQuery,
};
