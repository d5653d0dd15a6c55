//! Fieldsearch - dynamic field-driven search and reporting
//!
//! A search engine over "modules" (entity types) that expose virtual fields:
//! - Saved search definitions with criteria, sort keys, columns and schedules
//! - Criteria compiled to parameterised SQL with row security always applied
//! - Cached result id lists for cheap pagination
//! - Scheduled CSV reports delivered by email or file transfer

// Allow clippy lints that are acceptable for this codebase
#![allow(
    clippy::too_many_arguments,      // Service constructors take their collaborators explicitly
    clippy::type_complexity,         // Shared trait objects behind Arc are acceptable
    clippy::large_enum_variant,      // Destination variants are not hot-path values
)]

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod fields;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod workers;

pub use config::Config;
pub use error::{CompileError, Error, Result};
pub use state::AppState;
