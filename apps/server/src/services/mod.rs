//! Service layer - business logic over the stores

pub mod definitions;
pub mod export;
pub mod search;

pub use definitions::SearchDefinitionService;
pub use export::{Export, ExportSettings, ReportExporter};
pub use search::{SearchPage, SearchService, SearchSettings};
