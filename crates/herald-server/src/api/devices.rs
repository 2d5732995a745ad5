use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::hub::NotificationEvent;
use crate::storage::{DeliveryStatus, InboxEntry};
use crate::versions::DeviceVersionReport;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportVersionRequest {
    pub version: String,
    /// Absent keeps the stored code; blank clears it.
    pub card_code: Option<String>,
    pub app_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboxQuery {
    pub include_read: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxResponse {
    pub device_id: String,
    pub card_code: Option<String>,
    pub current_version: Option<String>,
    pub notifications: Vec<InboxItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItem {
    pub notification_id: i64,
    pub status: DeliveryStatus,
    pub delivered_at: Option<i64>,
    pub read_at: Option<i64>,
    pub notification: NotificationEvent,
}

impl From<&InboxEntry> for InboxItem {
    fn from(entry: &InboxEntry) -> Self {
        Self {
            notification_id: entry.notification.id,
            status: entry.status(),
            delivered_at: entry.delivered_at,
            read_at: entry.read_at,
            notification: NotificationEvent::from(&entry.notification),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub device_id: String,
    pub notification_id: i64,
    pub status: DeliveryStatus,
    pub read_at: Option<i64>,
}

/// `POST /api/devices/{device_id}/version`
pub async fn report_version(
    Path(device_id): Path<String>,
    State(state): State<AppState>,
    body: Result<Json<ReportVersionRequest>, JsonRejection>,
) -> Result<Json<DeviceVersionReport>, ApiError> {
    let Json(request) = body?;
    let report = state
        .versions
        .report_device_version(
            &device_id,
            &request.version,
            request.card_code.as_deref(),
            request.app_key.as_deref(),
        )
        .await?;
    Ok(Json(report))
}

/// `GET /api/devices/{device_id}/notifications?includeRead=`
///
/// Returns the device's unread notifications and marks pending ones as
/// delivered.
pub async fn inbox(
    Path(device_id): Path<String>,
    State(state): State<AppState>,
    query: Result<Query<InboxQuery>, QueryRejection>,
) -> Result<Json<InboxResponse>, ApiError> {
    let Query(query) = query?;
    let inbox = state
        .dispatcher
        .ledger()
        .fetch_inbox(&device_id, query.include_read)
        .await?;

    Ok(Json(InboxResponse {
        notifications: inbox.entries.iter().map(InboxItem::from).collect(),
        device_id: inbox.device.device_id,
        card_code: inbox.device.card_code,
        current_version: inbox.device.current_version,
    }))
}

/// `POST /api/devices/{device_id}/notifications/{id}/read`
pub async fn mark_read(
    Path((device_id, notification_id)): Path<(String, i64)>,
    State(state): State<AppState>,
) -> Result<Json<ReadReceipt>, ApiError> {
    let record = state
        .dispatcher
        .ledger()
        .mark_read(&device_id, notification_id)
        .await?;

    Ok(Json(ReadReceipt {
        status: record.status(),
        device_id: record.device_id,
        notification_id: record.notification_id,
        read_at: record.read_at,
    }))
}
