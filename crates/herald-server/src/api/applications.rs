use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::{ApiError, AppState};
use crate::storage::{Application, ApplicationSummary};
use crate::versions::RegisterApplication;

/// `GET /api/applications`
pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<ApplicationSummary>>, ApiError> {
    Ok(Json(state.versions.list_applications().await?))
}

/// `POST /api/applications`
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterApplication>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let app = state.versions.register_application(&request).await?;
    Ok((StatusCode::CREATED, Json(app)))
}

/// `GET /api/applications/{app_key}`
pub async fn get(
    Path(app_key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ApplicationSummary>, ApiError> {
    Ok(Json(state.versions.get_application(&app_key).await?))
}

/// `POST /api/applications/{app_key}/activate`
pub async fn activate(
    Path(app_key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Application>, ApiError> {
    Ok(Json(
        state.versions.set_application_active(&app_key, true).await?,
    ))
}

/// `POST /api/applications/{app_key}/deactivate`
pub async fn deactivate(
    Path(app_key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Application>, ApiError> {
    Ok(Json(
        state.versions.set_application_active(&app_key, false).await?,
    ))
}
