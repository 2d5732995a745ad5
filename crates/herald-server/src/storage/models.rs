//! Data models for Herald storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: i64,
    pub app_key: String,
    pub display_name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

/// Application row with the sizes of what it owns.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub application: Application,
    pub version_count: i64,
    pub notification_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AppVersion {
    #[serde(rename = "appVersionId")]
    pub id: i64,
    pub application_id: i64,
    pub version_name: String,
    pub platform: Option<String>,
    pub release_notes: Option<String>,
    pub file_url: String,
    pub file_checksum: Option<String>,
    pub release_date: i64,
    pub created_at: i64,
}

impl AppVersion {
    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            app_version_id: self.id,
            version_name: self.version_name.clone(),
            platform: self.platform.clone(),
            release_notes: self.release_notes.clone(),
            file_url: self.file_url.clone(),
            file_checksum: self.file_checksum.clone(),
            release_date: self.release_date,
        }
    }
}

/// Release joined with the key and name of its application.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AppVersionWithApp {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub version: AppVersion,
    pub app_key: String,
    pub app_name: String,
}

/// The release fields embedded in notification payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub app_version_id: i64,
    pub version_name: String,
    pub platform: Option<String>,
    pub release_notes: Option<String>,
    pub file_url: String,
    pub file_checksum: Option<String>,
    pub release_date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub application_id: i64,
    pub app_version_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub file_url: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

/// Notification joined with its application and (optional) announced release.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationDetail {
    pub id: i64,
    pub application_id: i64,
    pub app_version_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub file_url: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub app_key: String,
    pub app_name: String,
    pub version_name: Option<String>,
    pub version_platform: Option<String>,
    pub version_release_notes: Option<String>,
    pub version_file_url: Option<String>,
    pub version_file_checksum: Option<String>,
    pub version_release_date: Option<i64>,
}

impl NotificationDetail {
    /// The announced release, if the notification references one that still exists.
    pub fn version(&self) -> Option<VersionSummary> {
        let app_version_id = self.app_version_id?;
        Some(VersionSummary {
            app_version_id,
            version_name: self.version_name.clone()?,
            platform: self.version_platform.clone(),
            release_notes: self.version_release_notes.clone(),
            file_url: self.version_file_url.clone()?,
            file_checksum: self.version_file_checksum.clone(),
            release_date: self.version_release_date?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub card_code: Option<String>,
    pub current_version: Option<String>,
    pub last_seen: i64,
}

/// Per-device delivery state. Only moves forward: `Pending → Delivered → Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryRecord {
    pub device_id: String,
    pub notification_id: i64,
    pub status: String,
    pub delivered_at: Option<i64>,
    pub read_at: Option<i64>,
    pub created_at: i64,
}

impl DeliveryRecord {
    /// Parsed status. The table CHECK constraint keeps the column valid.
    pub fn status(&self) -> DeliveryStatus {
        self.status.parse().unwrap_or(DeliveryStatus::Pending)
    }
}

/// One inbox line: a delivery record with its notification.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InboxEntry {
    #[sqlx(flatten)]
    pub notification: NotificationDetail,
    pub status: String,
    pub delivered_at: Option<i64>,
    pub read_at: Option<i64>,
}

impl InboxEntry {
    pub fn status(&self) -> DeliveryStatus {
        self.status.parse().unwrap_or(DeliveryStatus::Pending)
    }
}
