//! Module and field discovery routes

use crate::api::handlers;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn module_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_modules))
        .route("/:module/fields", get(handlers::list_fields))
        .route("/:module/search", get(handlers::quick_search))
}
