use axum::Json;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use super::{ApiError, AppState};
use crate::attachments::{AttachmentError, ChunkStream, StoredAttachment};
use crate::dispatcher::{PublishReceipt, PublishRequest, PublishTarget};
use crate::hub::NotificationEvent;
use crate::validation::ValidationReport;

const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub receipt: PublishReceipt,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    pub app_key: String,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<NotificationEvent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClearQuery {
    pub app_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub status: &'static str,
    pub removed: u64,
}

/// `POST /api/notifications`
pub async fn publish(
    State(state): State<AppState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let receipt = state.dispatcher.publish(&request).await?;
    Ok((
        StatusCode::CREATED,
        Json(PublishResponse {
            status: "sent",
            receipt,
        }),
    ))
}

/// `POST /api/notifications/form`
///
/// Multipart variant of [`publish`]. Text parts `title`, `message` (or
/// `body`) and `link`. Targets come as a `targets` JSON array, as repeated
/// `appKey` parts, or both. An optional `file` part is streamed straight into
/// attachment storage and removed again if the publish is rejected.
pub async fn publish_form(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let mut multipart = multipart?;
    let mut upload = None;

    let request = match read_publish_form(&state, &mut multipart, &mut upload).await {
        Ok(request) => request,
        Err(e) => {
            if let Some(upload) = &upload {
                state.dispatcher.discard_upload(upload).await;
            }
            return Err(e);
        }
    };

    let receipt = state.dispatcher.publish_uploaded(&request, upload).await?;
    Ok((
        StatusCode::CREATED,
        Json(PublishResponse {
            status: "sent",
            receipt,
        }),
    ))
}

async fn read_publish_form(
    state: &AppState,
    multipart: &mut Multipart,
    upload: &mut Option<StoredAttachment>,
) -> Result<PublishRequest, ApiError> {
    let mut request = PublishRequest::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => request.title = field.text().await?,
            "message" | "body" => request.message = field.text().await?,
            "link" => request.link = Some(field.text().await?),
            "appKey" => request.targets.push(PublishTarget {
                app_key: field.text().await?,
                app_version_id: None,
            }),
            "targets" => {
                let raw = field.text().await?;
                let targets: Vec<PublishTarget> = serde_json::from_str(&raw).map_err(|_| {
                    ValidationReport::single("targets", "Must be a JSON array of targets")
                })?;
                request.targets.extend(targets);
            }
            "file" => {
                if upload.is_some() {
                    return Err(ApiError::BadRequest(
                        "Only one file may be attached".to_string(),
                    ));
                }
                let file_name = field.file_name().map(str::to_string);
                let chunks: ChunkStream<'_> = Box::pin(
                    field.map(|chunk| chunk.map_err(|e| AttachmentError::Upload(e.body_text()))),
                );
                match state
                    .dispatcher
                    .attachments()
                    .save_stream(chunks, file_name.as_deref())
                    .await
                {
                    Ok(stored) => *upload = Some(stored),
                    // File input left empty.
                    Err(AttachmentError::Empty) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            _ => {}
        }
    }

    Ok(request)
}

/// `GET /api/notifications?appKey=&page=&pageSize=`
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListResponse>, ApiError> {
    let Query(query) = query?;
    if query.app_key.trim().is_empty() {
        return Err(ValidationReport::single("appKey", "Field is required").into());
    }

    let page = state
        .dispatcher
        .list(&query.app_key, query.page, query.page_size)
        .await?;

    Ok(Json(ListResponse {
        total: page.total,
        page: page.page,
        page_size: page.page_size,
        items: page.items.iter().map(NotificationEvent::from).collect(),
    }))
}

/// `POST /api/notifications/clear?appKey=`
pub async fn clear(
    State(state): State<AppState>,
    query: Result<Query<ClearQuery>, QueryRejection>,
) -> Result<Json<ClearResponse>, ApiError> {
    let Query(query) = query?;
    let removed = state.dispatcher.clear(query.app_key.as_deref()).await?;
    Ok(Json(ClearResponse {
        status: "cleared",
        removed,
    }))
}

/// `DELETE /api/notifications/{id}`
pub async fn deactivate(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.dispatcher.deactivate(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
