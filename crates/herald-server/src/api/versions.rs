use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::storage::AppVersionWithApp;
use crate::validation::ValidationReport;
use crate::versions::{CreateVersion, VersionCheck};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    pub app_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckQuery {
    pub app_key: String,
    pub current_version: String,
}

/// `GET /api/app-versions?appKey=`
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<AppVersionWithApp>>, ApiError> {
    let Query(query) = query?;
    Ok(Json(
        state.versions.list_versions(query.app_key.as_deref()).await?,
    ))
}

/// `POST /api/app-versions`
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<CreateVersion>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let version = state.versions.create_version(&request).await?;
    Ok((StatusCode::CREATED, Json(version)))
}

/// `GET /api/app-versions/{id}`
pub async fn get(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<AppVersionWithApp>, ApiError> {
    Ok(Json(state.versions.get_version(id).await?))
}

/// `GET /api/app-versions/check?appKey=&currentVersion=`
pub async fn check(
    State(state): State<AppState>,
    query: Result<Query<CheckQuery>, QueryRejection>,
) -> Result<Json<VersionCheck>, ApiError> {
    let Query(query) = query?;

    let mut report = ValidationReport::new();
    report.require("appKey", query.app_key.trim(), usize::MAX);
    report.require("currentVersion", query.current_version.trim(), usize::MAX);
    report.into_result()?;

    Ok(Json(
        state
            .versions
            .check_app_version(&query.app_key, &query.current_version)
            .await?,
    ))
}
