//! Request handlers for API endpoints
//!
//! Handlers extract the acting user and request data, call a service and shape
//! the response. Errors convert through [`crate::Error`].

pub mod definitions;
pub mod fields;
pub mod metrics;
pub mod results;

pub use definitions::*;
pub use fields::*;
pub use metrics::*;
pub use results::*;
