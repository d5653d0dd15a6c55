//! Search execution handlers
//!
//! - GET /search-definitions/:id/results?page&per_page&retry
//! - GET /search-definitions/:id/export
//! - GET /modules/:module/search?q&page&per_page

use crate::{
    api::extractors::CurrentUser,
    models::{ModuleId, RunTarget},
    services::SearchPage,
    state::AppState,
    Result,
};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "first_page")]
    pub page: u32,
    pub per_page: Option<u32>,
    /// Clear a failed result cache entry before running.
    #[serde(default)]
    pub retry: bool,
}

#[derive(Debug, Deserialize)]
pub struct QuickSearchParams {
    pub q: String,
    #[serde(default = "first_page")]
    pub page: u32,
    pub per_page: Option<u32>,
}

fn first_page() -> u32 {
    1
}

/// GET /search-definitions/:id/results
pub async fn definition_results(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<SearchPage>> {
    if params.retry && state.search.retry(&user, RunTarget::Definition(id)) {
        tracing::info!(search_definition_id = id, user_id = user.id, "Retrying failed search");
    }
    let page = state
        .search
        .execute(&user, id, params.page, params.per_page)
        .await?;
    Ok(Json(page))
}

/// GET /search-definitions/:id/export
pub async fn export_definition(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let definition = state.definitions.get(&user, id).await?;
    let export = state
        .exporter
        .export_csv(&definition, &user, Utc::now())
        .await?;

    let disposition = format!("attachment; filename=\"{}\"", export.filename);
    Ok((
        [
            (header::CONTENT_TYPE, export.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.bytes,
    ))
}

/// GET /modules/:module/search
pub async fn quick_search(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(module): Path<String>,
    Query(params): Query<QuickSearchParams>,
) -> Result<Json<SearchPage>> {
    let page = state
        .search
        .quick_search(
            &user,
            &ModuleId::new(module),
            &params.q,
            params.page,
            params.per_page,
        )
        .await?;
    Ok(Json(page))
}
