//! Search definition handlers
//!
//! - GET/POST /search-definitions
//! - GET/PUT/DELETE /search-definitions/:id
//! - POST /search-definitions/:id/copy
//! - POST /search-definitions/:id/give
//! - DELETE /search-definitions/:id/{criteria|sorts|columns|schedules}/:child_id
//!
//! Transfer passwords never leave the service; updates that send an empty
//! password keep the stored one.

use crate::{
    api::extractors::CurrentUser,
    models::{ModuleId, SearchDefinition, SearchDefinitionDraft},
    state::AppState,
    Error, Result,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub module: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CopyRequest {
    pub name: String,
    #[serde(default)]
    pub with_schedules: bool,
}

#[derive(Debug, Deserialize)]
pub struct GiveRequest {
    pub user_id: i64,
}

/// A definition plus a readable rendering of each criterion.
#[derive(Debug, Serialize)]
pub struct DefinitionView {
    #[serde(flatten)]
    pub definition: SearchDefinition,
    pub criteria_summary: Vec<String>,
}

/// GET /search-definitions
pub async fn list_definitions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SearchDefinition>>> {
    let module = params.module.map(ModuleId::new);
    let definitions = state.definitions.list(&user, module.as_ref()).await?;
    Ok(Json(definitions.iter().map(|d| d.redacted()).collect()))
}

/// POST /search-definitions
pub async fn create_definition(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(draft): Json<SearchDefinitionDraft>,
) -> Result<impl IntoResponse> {
    let definition = state.definitions.create(&user, draft).await?;
    Ok((StatusCode::CREATED, Json(definition.redacted())))
}

/// GET /search-definitions/:id
pub async fn get_definition(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<DefinitionView>> {
    let definition = state.definitions.get(&user, id).await?;

    let mut criteria_summary = Vec::with_capacity(definition.criteria.len());
    for criterion in definition.criteria_by_rank() {
        criteria_summary.push(criterion.describe(&state.registry).await);
    }

    Ok(Json(DefinitionView {
        definition: definition.redacted(),
        criteria_summary,
    }))
}

/// PUT /search-definitions/:id
pub async fn update_definition(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(draft): Json<SearchDefinitionDraft>,
) -> Result<Json<SearchDefinition>> {
    let definition = state.definitions.update(&user, id, draft).await?;
    Ok(Json(definition.redacted()))
}

/// DELETE /search-definitions/:id
pub async fn delete_definition(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.definitions.destroy(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /search-definitions/:id/copy
pub async fn copy_definition(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(request): Json<CopyRequest>,
) -> Result<impl IntoResponse> {
    let copy = state
        .definitions
        .copy(&user, id, &request.name, request.with_schedules)
        .await?;
    Ok((StatusCode::CREATED, Json(copy.redacted())))
}

/// POST /search-definitions/:id/give
pub async fn give_definition(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(request): Json<GiveRequest>,
) -> Result<impl IntoResponse> {
    let copy = state.definitions.give_to(&user, id, request.user_id).await?;
    Ok((StatusCode::CREATED, Json(copy.redacted())))
}

/// DELETE /search-definitions/:id/:kind/:child_id
pub async fn delete_definition_child(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, kind, child_id)): Path<(i64, String, i64)>,
) -> Result<StatusCode> {
    let service = &state.definitions;
    match kind.as_str() {
        "criteria" => service.delete_criterion(&user, id, child_id).await?,
        "sorts" => service.delete_sort(&user, id, child_id).await?,
        "columns" => service.delete_column(&user, id, child_id).await?,
        "schedules" => service.delete_schedule(&user, id, child_id).await?,
        other => return Err(Error::NotFound(format!("no such collection '{other}'"))),
    }
    Ok(StatusCode::NO_CONTENT)
}
