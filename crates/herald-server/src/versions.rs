//! Applications, their releases, and client version checks.

use std::sync::Arc;

use herald_core::db::unix_timestamp;
use herald_core::version;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::attachments::{AttachmentStore, decode_base64_payload};
use crate::storage::{
    AppVersionWithApp, Application, ApplicationSummary, DatabaseError, Device, HeraldDatabase,
    NewAppVersion, VersionSummary,
};
use crate::validation::{MAX_DEVICE_ID_LEN, ValidationReport, non_blank, normalize_app_key};

const MAX_APP_KEY_LEN: usize = 100;
const MAX_DISPLAY_NAME_LEN: usize = 150;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_VERSION_NAME_LEN: usize = 50;
const MAX_PLATFORM_LEN: usize = 30;
const MAX_FILE_URL_LEN: usize = 255;
const MAX_CHECKSUM_LEN: usize = 128;
const MAX_CARD_CODE_LEN: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterApplication {
    pub app_key: String,
    pub display_name: String,
    pub description: Option<String>,
}

/// A release to record. Exactly one of `file_url` or `file_base64` is given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateVersion {
    pub app_key: String,
    pub version_name: String,
    pub platform: Option<String>,
    pub release_notes: Option<String>,
    pub file_url: Option<String>,
    pub file_base64: Option<String>,
    pub file_name: Option<String>,
    pub file_checksum: Option<String>,
    /// Unix seconds; defaults to now.
    pub release_date: Option<i64>,
}

/// Answer to "is there something newer than what I run?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCheck {
    pub current_version: String,
    pub server_version: Option<String>,
    pub update_available: bool,
    /// Set when either side is not a dotted-numeric version.
    pub comparison_note: Option<String>,
    /// Set when the application has no release yet.
    pub message: Option<String>,
    pub latest_release: Option<VersionSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceVersionReport {
    pub device_id: String,
    pub card_code: Option<String>,
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
    pub update_required: bool,
}

/// Applications and releases, backed by the shared database.
#[derive(Clone)]
pub struct VersionStore {
    db: HeraldDatabase,
    attachments: Arc<dyn AttachmentStore>,
}

impl VersionStore {
    pub fn new(db: HeraldDatabase, attachments: Arc<dyn AttachmentStore>) -> Self {
        Self { db, attachments }
    }

    // =========================================================================
    // Applications
    // =========================================================================

    pub async fn register_application(
        &self,
        request: &RegisterApplication,
    ) -> Result<Application, VersionStoreError> {
        let app_key = normalize_app_key(&request.app_key);
        let display_name = request.display_name.trim();
        let description = non_blank(request.description.as_deref());

        let mut report = ValidationReport::new();
        report.require("appKey", &app_key, MAX_APP_KEY_LEN);
        report.require("displayName", display_name, MAX_DISPLAY_NAME_LEN);
        if let Some(description) = description {
            report.max_len("description", description, MAX_DESCRIPTION_LEN);
        }
        report.into_result()?;

        let app = self
            .db
            .create_application(&app_key, display_name, description)
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(_) => {
                    VersionStoreError::Conflict(format!("Application {app_key} already exists"))
                }
                other => other.into(),
            })?;

        info!(app_key = %app.app_key, "Application registered");
        Ok(app)
    }

    pub async fn list_applications(&self) -> Result<Vec<ApplicationSummary>, VersionStoreError> {
        Ok(self.db.list_applications().await?)
    }

    pub async fn get_application(
        &self,
        app_key: &str,
    ) -> Result<ApplicationSummary, VersionStoreError> {
        Ok(self
            .db
            .get_application_summary(&normalize_app_key(app_key))
            .await?)
    }

    /// Activate or deactivate an application. Inactive applications reject
    /// new releases and publishes.
    pub async fn set_application_active(
        &self,
        app_key: &str,
        active: bool,
    ) -> Result<Application, VersionStoreError> {
        let app_key = normalize_app_key(app_key);
        if !self.db.set_application_active(&app_key, active).await? {
            return Err(VersionStoreError::NotFound(format!("Application {app_key}")));
        }

        info!(app_key = %app_key, active, "Application active flag changed");
        Ok(self.db.get_application(&app_key).await?)
    }

    // =========================================================================
    // Releases
    // =========================================================================

    /// Record a release. An uploaded payload is stored first and its SHA-256
    /// is used when no checksum is supplied.
    pub async fn create_version(
        &self,
        request: &CreateVersion,
    ) -> Result<AppVersionWithApp, VersionStoreError> {
        let app_key = normalize_app_key(&request.app_key);
        let version_name = request.version_name.trim();
        let platform = non_blank(request.platform.as_deref()).map(str::to_lowercase);
        let release_notes = non_blank(request.release_notes.as_deref());
        let file_url = non_blank(request.file_url.as_deref());
        let file_base64 = non_blank(request.file_base64.as_deref());
        let file_checksum = non_blank(request.file_checksum.as_deref());

        let mut report = ValidationReport::new();
        report.require("appKey", &app_key, MAX_APP_KEY_LEN);
        report.require("versionName", version_name, MAX_VERSION_NAME_LEN);
        if let Some(platform) = &platform {
            report.max_len("platform", platform, MAX_PLATFORM_LEN);
        }
        if let Some(checksum) = file_checksum {
            report.max_len("fileChecksum", checksum, MAX_CHECKSUM_LEN);
        }
        match (file_url, file_base64) {
            (Some(url), None) => report.max_len("fileUrl", url, MAX_FILE_URL_LEN),
            (None, Some(_)) => {}
            (Some(_), Some(_)) => {
                report.add("fileUrl", "Provide either fileUrl or fileBase64, not both");
            }
            (None, None) => report.add("fileUrl", "Provide fileUrl or fileBase64"),
        }
        report.into_result()?;

        let app = self.active_application(&app_key, "appKey").await?;

        if self
            .db
            .version_exists(app.id, version_name, platform.as_deref())
            .await?
        {
            return Err(ValidationReport::single(
                "versionName",
                "Version already exists for this application",
            )
            .into());
        }

        let (file_url, file_checksum) = match file_base64 {
            Some(payload) => {
                let bytes = decode_base64_payload(payload).ok_or_else(|| {
                    ValidationReport::single("fileBase64", "Not valid base64 content")
                })?;
                let stored = self
                    .attachments
                    .save(&bytes, request.file_name.as_deref())
                    .await
                    .map_err(|e| VersionStoreError::Storage(e.to_string()))?;
                let checksum = file_checksum.map_or(stored.sha256, str::to_string);
                (stored.url, Some(checksum))
            }
            None => (
                file_url.unwrap_or_default().to_string(),
                file_checksum.map(str::to_string),
            ),
        };

        let created = self
            .db
            .create_app_version(&NewAppVersion {
                application_id: app.id,
                version_name,
                platform: platform.as_deref(),
                release_notes,
                file_url: &file_url,
                file_checksum: file_checksum.as_deref(),
                release_date: request.release_date.unwrap_or_else(unix_timestamp),
            })
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(_) => VersionStoreError::Conflict(format!(
                    "Version {version_name} already exists for {app_key}"
                )),
                other => other.into(),
            })?;

        info!(
            app_key = %app.app_key,
            version = %created.version_name,
            platform = ?created.platform,
            "Release recorded"
        );

        Ok(AppVersionWithApp {
            version: created,
            app_key: app.app_key,
            app_name: app.display_name,
        })
    }

    pub async fn list_versions(
        &self,
        app_key: Option<&str>,
    ) -> Result<Vec<AppVersionWithApp>, VersionStoreError> {
        let app_key = non_blank(app_key).map(normalize_app_key);
        Ok(self.db.list_versions(app_key.as_deref()).await?)
    }

    pub async fn get_version(&self, id: i64) -> Result<AppVersionWithApp, VersionStoreError> {
        self.db
            .find_version_with_app(id)
            .await?
            .ok_or_else(|| VersionStoreError::NotFound(format!("AppVersion {id}")))
    }

    /// Compare a client's version with the application's latest release.
    pub async fn check_app_version(
        &self,
        app_key: &str,
        current_version: &str,
    ) -> Result<VersionCheck, VersionStoreError> {
        let app_key = normalize_app_key(app_key);
        let app = self
            .db
            .find_application_by_key(&app_key)
            .await?
            .filter(|a| a.is_active)
            .ok_or_else(|| VersionStoreError::NotFound(format!("Application {app_key}")))?;

        let current_version = current_version.trim().to_string();
        let Some(latest) = self.db.latest_version(app.id).await? else {
            return Ok(VersionCheck {
                current_version,
                server_version: None,
                update_available: false,
                comparison_note: None,
                message: Some("No release has been published for this application".to_string()),
                latest_release: None,
            });
        };

        let current_ok = current_version.parse::<herald_core::ReleaseVersion>().is_ok();
        let latest_ok = latest.version_name.parse::<herald_core::ReleaseVersion>().is_ok();
        let comparison_note = if !current_ok {
            Some("currentVersion is not in x.y.z format".to_string())
        } else if !latest_ok {
            Some("The latest release name is not in x.y.z format".to_string())
        } else {
            None
        };
        let update_available = version::compare(&current_version, &latest.version_name)
            .is_some_and(|ordering| ordering.is_lt());

        Ok(VersionCheck {
            current_version,
            server_version: Some(latest.version_name.clone()),
            update_available,
            comparison_note,
            message: None,
            latest_release: Some(latest.summary()),
        })
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Record the version a device runs and tell it whether to upgrade.
    ///
    /// `card_code`: `None` keeps the stored code, a blank value clears it.
    /// The target version is the one announced by the most recent active
    /// notification, within `app_key` when given.
    pub async fn report_device_version(
        &self,
        device_id: &str,
        version_name: &str,
        card_code: Option<&str>,
        app_key: Option<&str>,
    ) -> Result<DeviceVersionReport, VersionStoreError> {
        let device_id = device_id.trim();
        let version_name = version_name.trim();
        let card_code = card_code.map(|c| non_blank(Some(c)));

        let mut report = ValidationReport::new();
        report.require("deviceId", device_id, MAX_DEVICE_ID_LEN);
        report.require("version", version_name, MAX_VERSION_NAME_LEN);
        if let Some(Some(code)) = card_code {
            report.max_len("cardCode", code, MAX_CARD_CODE_LEN);
        }
        report.into_result()?;

        let application_id = match non_blank(app_key) {
            Some(key) => {
                let key = normalize_app_key(key);
                Some(self.db.get_application(&key).await?.id)
            }
            None => None,
        };

        let device: Device = self
            .db
            .report_device_version(device_id, version_name, card_code)
            .await?;
        let latest_version = self.db.latest_announced_version(application_id).await?;
        let update_required = latest_version
            .as_deref()
            .is_some_and(|latest| version::needs_upgrade(version_name, latest));

        info!(
            device_id = %device.device_id,
            version = %version_name,
            latest = ?latest_version,
            update_required,
            "Device version reported"
        );

        Ok(DeviceVersionReport {
            device_id: device.device_id,
            card_code: device.card_code,
            current_version: device.current_version,
            latest_version,
            update_required,
        })
    }

    async fn active_application(
        &self,
        app_key: &str,
        field: &str,
    ) -> Result<Application, VersionStoreError> {
        match self.db.find_application_by_key(app_key).await? {
            Some(app) if app.is_active => Ok(app),
            _ => {
                let mut report = ValidationReport::new();
                report.missing_app(field, app_key);
                Err(report.into())
            }
        }
    }
}

/// Application and release errors.
#[derive(Debug, thiserror::Error)]
pub enum VersionStoreError {
    #[error("Validation failed: {0}")]
    Validation(ValidationReport),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Attachment storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<ValidationReport> for VersionStoreError {
    fn from(report: ValidationReport) -> Self {
        Self::Validation(report)
    }
}

impl From<DatabaseError> for VersionStoreError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(msg) => Self::NotFound(msg),
            DatabaseError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::attachments::{FilesystemAttachmentStore, sha256_hex};
    use crate::storage::{NewNotification, NotificationTarget};

    async fn setup() -> (VersionStore, HeraldDatabase, tempfile::TempDir) {
        let db = HeraldDatabase::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let attachments = Arc::new(FilesystemAttachmentStore::new(dir.path(), "/uploads"));
        (VersionStore::new(db.clone(), attachments), db, dir)
    }

    fn register(key: &str, name: &str) -> RegisterApplication {
        RegisterApplication {
            app_key: key.to_string(),
            display_name: name.to_string(),
            description: None,
        }
    }

    fn release(app_key: &str, name: &str) -> CreateVersion {
        CreateVersion {
            app_key: app_key.to_string(),
            version_name: name.to_string(),
            file_url: Some("https://cdn.example.com/app.apk".to_string()),
            ..CreateVersion::default()
        }
    }

    #[tokio::test]
    async fn register_normalizes_key() {
        let (store, _db, _dir) = setup().await;
        let app = store
            .register_application(&register("  ACME ", " Acme "))
            .await
            .unwrap();
        assert_eq!(app.app_key, "acme");
        assert_eq!(app.display_name, "Acme");

        let err = store
            .register_application(&register("Acme", "Again"))
            .await
            .unwrap_err();
        assert!(matches!(err, VersionStoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_validates_lengths() {
        let (store, _db, _dir) = setup().await;
        let mut request = register("", &"n".repeat(151));
        request.description = Some("d".repeat(501));

        let VersionStoreError::Validation(report) =
            store.register_application(&request).await.unwrap_err()
        else {
            panic!("expected validation error");
        };
        assert!(report.errors.contains_key("appKey"));
        assert!(report.errors.contains_key("displayName"));
        assert!(report.errors.contains_key("description"));
    }

    #[tokio::test]
    async fn deactivate_unknown_application() {
        let (store, _db, _dir) = setup().await;
        let err = store
            .set_application_active("ghost", false)
            .await
            .unwrap_err();
        assert!(matches!(err, VersionStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_version_from_url() {
        let (store, _db, _dir) = setup().await;
        store.register_application(&register("acme", "Acme")).await.unwrap();

        let mut request = release("ACME", " 1.0.0 ");
        request.platform = Some(" Android ".to_string());
        let created = store.create_version(&request).await.unwrap();

        assert_eq!(created.app_key, "acme");
        assert_eq!(created.version.version_name, "1.0.0");
        assert_eq!(created.version.platform.as_deref(), Some("android"));
        assert!(created.version.file_checksum.is_none());

        let err = store.create_version(&request).await.unwrap_err();
        assert!(matches!(err, VersionStoreError::Validation(_)));
    }

    #[tokio::test]
    async fn create_version_from_upload_computes_checksum() {
        let (store, _db, dir) = setup().await;
        store.register_application(&register("acme", "Acme")).await.unwrap();

        let request = CreateVersion {
            app_key: "acme".to_string(),
            version_name: "2.0".to_string(),
            file_base64: Some("aGVsbG8=".to_string()),
            file_name: Some("app.apk".to_string()),
            ..CreateVersion::default()
        };
        let created = store.create_version(&request).await.unwrap();

        assert!(created.version.file_url.starts_with("/uploads/"));
        assert!(created.version.file_url.ends_with(".apk"));
        assert_eq!(
            created.version.file_checksum.as_deref(),
            Some(sha256_hex(b"hello").as_str())
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn create_version_rejects_bad_upload_without_writing() {
        let (store, db, dir) = setup().await;
        store.register_application(&register("acme", "Acme")).await.unwrap();

        let request = CreateVersion {
            app_key: "acme".to_string(),
            version_name: "2.0".to_string(),
            file_base64: Some("%%%".to_string()),
            ..CreateVersion::default()
        };
        let VersionStoreError::Validation(report) =
            store.create_version(&request).await.unwrap_err()
        else {
            panic!("expected validation error");
        };
        assert!(report.errors.contains_key("fileBase64"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(db.list_versions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_version_requires_active_application() {
        let (store, _db, _dir) = setup().await;
        store.register_application(&register("acme", "Acme")).await.unwrap();
        store.set_application_active("acme", false).await.unwrap();

        let VersionStoreError::Validation(report) =
            store.create_version(&release("acme", "1.0")).await.unwrap_err()
        else {
            panic!("expected validation error");
        };
        assert_eq!(report.missing_app_keys, ["acme"]);

        let err = store
            .create_version(&CreateVersion {
                app_key: "acme".to_string(),
                version_name: "1.0".to_string(),
                ..CreateVersion::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VersionStoreError::Validation(r) if r.errors.contains_key("fileUrl")
        ));
    }

    #[tokio::test]
    async fn check_app_version_compares_numerically() {
        let (store, _db, _dir) = setup().await;
        store.register_application(&register("acme", "Acme")).await.unwrap();

        let empty = store.check_app_version("acme", "1.0").await.unwrap();
        assert!(!empty.update_available);
        assert!(empty.message.is_some());
        assert!(empty.latest_release.is_none());

        let mut request = release("acme", "1.10.0");
        request.release_date = Some(200);
        store.create_version(&request).await.unwrap();
        let mut older = release("acme", "1.9.0");
        older.release_date = Some(100);
        store.create_version(&older).await.unwrap();

        let check = store.check_app_version("acme", "1.9.5").await.unwrap();
        assert!(check.update_available);
        assert_eq!(check.server_version.as_deref(), Some("1.10.0"));
        assert!(check.comparison_note.is_none());

        let current = store.check_app_version("acme", "1.10").await.unwrap();
        assert!(!current.update_available);

        let odd = store.check_app_version("acme", "beta").await.unwrap();
        assert!(!odd.update_available);
        assert!(odd.comparison_note.is_some());

        let err = store.check_app_version("ghost", "1.0").await.unwrap_err();
        assert!(matches!(err, VersionStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn report_device_version_against_announced_release() {
        let (store, db, _dir) = setup().await;
        let app = store.register_application(&register("acme", "Acme")).await.unwrap();

        let none = store
            .report_device_version("dev-1", "1.0.0", Some("CARD-1"), None)
            .await
            .unwrap();
        assert!(!none.update_required);
        assert!(none.latest_version.is_none());
        assert_eq!(none.card_code.as_deref(), Some("CARD-1"));

        let v = store.create_version(&release("acme", "1.2.0")).await.unwrap();
        db.insert_notifications(
            &NewNotification {
                title: "Update",
                message: "1.2.0 is out",
                link: None,
                file_url: None,
                created_at: unix_timestamp(),
            },
            &[NotificationTarget {
                application_id: app.id,
                app_version_id: Some(v.version.id),
            }],
            10,
        )
        .await
        .unwrap();

        let outdated = store
            .report_device_version(" dev-1 ", "1.0.0", None, Some("acme"))
            .await
            .unwrap();
        assert!(outdated.update_required);
        assert_eq!(outdated.latest_version.as_deref(), Some("1.2.0"));
        assert_eq!(outdated.card_code.as_deref(), Some("CARD-1"));

        let cleared = store
            .report_device_version("dev-1", "1.2.0", Some("  "), None)
            .await
            .unwrap();
        assert!(!cleared.update_required);
        assert!(cleared.card_code.is_none());

        let err = store
            .report_device_version("dev-1", "1.2.0", None, Some("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, VersionStoreError::NotFound(_)));
    }
}
