//! Search definition routes

use crate::api::handlers;
use crate::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};

pub fn definition_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_definitions).post(handlers::create_definition),
        )
        .route(
            "/:id",
            get(handlers::get_definition)
                .put(handlers::update_definition)
                .delete(handlers::delete_definition),
        )
        .route("/:id/copy", post(handlers::copy_definition))
        .route("/:id/give", post(handlers::give_definition))
        .route("/:id/results", get(handlers::definition_results))
        .route("/:id/export", get(handlers::export_definition))
        .route(
            "/:id/:kind/:child_id",
            delete(handlers::delete_definition_child),
        )
}
