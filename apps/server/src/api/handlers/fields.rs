//! Module and field discovery handlers

use crate::{
    api::extractors::CurrentUser, fields::FieldSummary, models::ModuleId, state::AppState, Result,
};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ModuleSummary {
    pub id: ModuleId,
    pub label: String,
    pub requires_criterion: bool,
}

/// GET /modules
pub async fn list_modules(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Json<Vec<ModuleSummary>> {
    Json(
        state
            .registry
            .modules()
            .iter()
            .map(|m| ModuleSummary {
                id: m.id.clone(),
                label: m.label.clone(),
                requires_criterion: m.requires_criterion,
            })
            .collect(),
    )
}

/// GET /modules/:module/fields
///
/// Fields the user may search, sort and display, native then custom.
pub async fn list_fields(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(module): Path<String>,
) -> Result<Json<Vec<FieldSummary>>> {
    let fields = state
        .registry
        .fields_for(&ModuleId::new(module), &user)
        .await?;
    Ok(Json(fields.iter().map(|f| f.summary()).collect()))
}
