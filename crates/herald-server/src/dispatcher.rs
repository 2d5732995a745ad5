//! Notification publishing.
//!
//! A publish is validated completely before anything is written: targets,
//! release ownership and the attachment payload. The attachment is stored
//! once, then all notification rows are inserted in one transaction. Only
//! after that commit does fan-out start: live hub events go out first, then
//! pending ledger records are created. Fan-out failures never fail the
//! publish.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use herald_core::db::unix_timestamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attachments::{AttachmentStore, StoredAttachment, decode_base64_payload};
use crate::hub::{BroadcastHub, NotificationEvent};
use crate::ledger::DeliveryLedger;
use crate::storage::{
    AppVersion, Application, DatabaseError, HeraldDatabase, NewNotification, NotificationDetail,
    NotificationTarget,
};
use crate::validation::{ValidationReport, non_blank, normalize_app_key};

const MAX_TITLE_LEN: usize = 100;
const MAX_MESSAGE_LEN: usize = 4000;
const MAX_LINK_LEN: usize = 255;
const MAX_APP_KEY_LEN: usize = 100;

/// Largest page size accepted by [`NotificationDispatcher::list`].
pub const MAX_PAGE_SIZE: u32 = 200;

/// A publish request as clients send it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishRequest {
    pub title: String,
    #[serde(alias = "body")]
    pub message: String,
    pub link: Option<String>,
    pub targets: Vec<PublishTarget>,
    pub file_base64: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishTarget {
    pub app_key: String,
    pub app_version_id: Option<i64>,
}

/// What one publish created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub file_url: Option<String>,
    pub results: Vec<PublishResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub app_key: String,
    pub notification_id: i64,
    pub app_version_id: Option<i64>,
}

/// One page of an application's notifications.
#[derive(Debug, Clone)]
pub struct NotificationPage {
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<NotificationDetail>,
}

/// A validated target with everything fan-out needs.
struct ResolvedTarget {
    app: Application,
    version: Option<AppVersion>,
}

/// Orchestrates validation, persistence, ledger fan-out and live delivery.
#[derive(Clone)]
pub struct NotificationDispatcher {
    db: HeraldDatabase,
    ledger: DeliveryLedger,
    hub: Arc<BroadcastHub>,
    attachments: Arc<dyn AttachmentStore>,
    retention_limit: u32,
}

impl NotificationDispatcher {
    pub fn new(
        db: HeraldDatabase,
        hub: Arc<BroadcastHub>,
        attachments: Arc<dyn AttachmentStore>,
        retention_limit: u32,
    ) -> Self {
        Self {
            ledger: DeliveryLedger::new(db.clone()),
            db,
            hub,
            attachments,
            retention_limit: retention_limit.max(1),
        }
    }

    pub const fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn attachments(&self) -> &Arc<dyn AttachmentStore> {
        &self.attachments
    }

    /// Publish one notification to every target.
    ///
    /// Either every target gets a notification row, or nothing is written
    /// and the error says why.
    pub async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt, DispatchError> {
        let resolved = self.preflight(request).await?;

        let stored = match non_blank(request.file_base64.as_deref()) {
            Some(payload) => {
                let bytes = decode_base64_payload(payload).ok_or_else(|| {
                    ValidationReport::single("fileBase64", "Not valid base64 content")
                })?;
                let stored = self
                    .attachments
                    .save(&bytes, request.file_name.as_deref())
                    .await
                    .map_err(|e| DispatchError::Storage(e.to_string()))?;
                Some(stored)
            }
            None => None,
        };

        let url = stored.as_ref().map(|s| s.url.clone());
        let result = self.commit(request, &resolved, url).await;
        if result.is_err()
            && let Some(stored) = &stored
        {
            self.discard_upload(stored).await;
        }
        result
    }

    /// Publish with an attachment that is already stored, such as a streamed
    /// multipart upload. `request.file_base64` is ignored. The upload is
    /// discarded when the publish fails.
    pub async fn publish_uploaded(
        &self,
        request: &PublishRequest,
        upload: Option<StoredAttachment>,
    ) -> Result<PublishReceipt, DispatchError> {
        let result = match self.preflight(request).await {
            Ok(resolved) => {
                let url = upload.as_ref().map(|u| u.url.clone());
                self.commit(request, &resolved, url).await
            }
            Err(e) => Err(e),
        };

        if result.is_err()
            && let Some(upload) = &upload
        {
            self.discard_upload(upload).await;
        }

        result
    }

    /// Remove an upload no notification will refer to. Failures are logged.
    pub async fn discard_upload(&self, upload: &StoredAttachment) {
        if let Err(e) = self.attachments.discard(upload).await {
            warn!(file = %upload.file_name, error = %e, "Failed to discard rejected upload");
        }
    }

    /// Validate fields and resolve every target. Nothing is written.
    async fn preflight(
        &self,
        request: &PublishRequest,
    ) -> Result<Vec<ResolvedTarget>, DispatchError> {
        let link = non_blank(request.link.as_deref());

        let mut report = ValidationReport::new();
        report.require("title", request.title.trim(), MAX_TITLE_LEN);
        report.require("message", request.message.trim(), MAX_MESSAGE_LEN);
        if let Some(link) = link {
            report.max_len("link", link, MAX_LINK_LEN);
        }
        if request.targets.is_empty() {
            report.add("targets", "At least one target application is required");
        }
        let targets = normalize_targets(&request.targets, &mut report);
        report.into_result()?;

        self.resolve_targets(&targets).await
    }

    /// Insert the rows, then fan out: live events first, ledger records
    /// after. Fan-out failures are logged and never fail the publish.
    async fn commit(
        &self,
        request: &PublishRequest,
        resolved: &[ResolvedTarget],
        attachment: Option<String>,
    ) -> Result<PublishReceipt, DispatchError> {
        let title = request.title.trim();
        let created_at = unix_timestamp();
        let rows: Vec<NotificationTarget> = resolved
            .iter()
            .map(|t| NotificationTarget {
                application_id: t.app.id,
                app_version_id: t.version.as_ref().map(|v| v.id),
            })
            .collect();

        let inserted = self
            .db
            .insert_notifications(
                &NewNotification {
                    title,
                    message: request.message.trim(),
                    link: non_blank(request.link.as_deref()),
                    file_url: attachment.as_deref(),
                    created_at,
                },
                &rows,
                self.retention_limit,
            )
            .await
            .map_err(|e| DispatchError::Database(e.to_string()))?;

        if !inserted.purged_ids.is_empty() {
            info!(
                purged = inserted.purged_ids.len(),
                retention_limit = self.retention_limit,
                "Retention limit reached, oldest notifications purged"
            );
        }

        let purged: HashSet<i64> = inserted.purged_ids.iter().copied().collect();

        for (notification, target) in inserted.notifications.iter().zip(resolved) {
            if purged.contains(&notification.id) {
                continue;
            }
            let report = self.hub.publish(NotificationEvent {
                app_key: target.app.app_key.clone(),
                app_name: target.app.display_name.clone(),
                notification_id: notification.id,
                title: notification.title.clone(),
                message: notification.message.clone(),
                created_at: notification.created_at,
                link: notification.link.clone(),
                file_url: notification.file_url.clone(),
                app_version: target.version.as_ref().map(AppVersion::summary),
            });
            debug!(
                notification_id = notification.id,
                app_key = %target.app.app_key,
                delivered = report.delivered,
                dropped = report.dropped,
                "Notification published live"
            );
        }

        let live: Vec<i64> = inserted
            .notifications
            .iter()
            .map(|n| n.id)
            .filter(|id| !purged.contains(id))
            .collect();

        match self.ledger.create_pending(&live).await {
            Ok(report) if report.failed > 0 => warn!(
                failed = report.failed,
                created = report.created,
                "Some pending delivery records could not be created"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Pending delivery fan-out failed"),
        }

        let results: Vec<PublishResult> = inserted
            .notifications
            .iter()
            .zip(resolved)
            .map(|(n, t)| PublishResult {
                app_key: t.app.app_key.clone(),
                notification_id: n.id,
                app_version_id: n.app_version_id,
            })
            .collect();

        info!(
            title = %title,
            targets = results.len(),
            attachment = attachment.is_some(),
            "Notification published"
        );

        Ok(PublishReceipt {
            file_url: attachment,
            results,
        })
    }

    /// Page through an active application's notifications, newest first.
    ///
    /// `page` starts at 1; `page_size` is clamped to `1..=200`.
    pub async fn list(
        &self,
        app_key: &str,
        page: u32,
        page_size: u32,
    ) -> Result<NotificationPage, DispatchError> {
        let app_key = normalize_app_key(app_key);
        let app = self
            .db
            .find_application_by_key(&app_key)
            .await
            .map_err(DispatchError::from)?
            .filter(|a| a.is_active)
            .ok_or_else(|| DispatchError::NotFound(format!("Application {app_key}")))?;

        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(page_size);

        let total = self.db.count_notifications(app.id, true).await?;
        let items = self.db.list_notifications(app.id, page_size, offset).await?;

        Ok(NotificationPage {
            total,
            page,
            page_size,
            items,
        })
    }

    /// Soft-delete a notification.
    pub async fn deactivate(&self, notification_id: i64) -> Result<(), DispatchError> {
        if !self.db.deactivate_notification(notification_id).await? {
            return Err(DispatchError::NotFound(format!(
                "Notification {notification_id}"
            )));
        }
        info!(notification_id, "Notification deactivated");
        Ok(())
    }

    /// Delete notifications of one application, or of all when `app_key` is
    /// `None`. Returns how many were removed.
    pub async fn clear(&self, app_key: Option<&str>) -> Result<u64, DispatchError> {
        let application_id = match non_blank(app_key) {
            Some(key) => {
                let key = normalize_app_key(key);
                let app = self
                    .db
                    .find_application_by_key(&key)
                    .await?
                    .ok_or_else(|| DispatchError::NotFound(format!("Application {key}")))?;
                Some(app.id)
            }
            None => None,
        };

        let removed = self.db.clear_notifications(application_id).await?;
        info!(app_key = ?app_key, removed, "Notifications cleared");
        Ok(removed)
    }

    /// Resolve every target against the registered applications and their
    /// releases. Unknown or inactive applications are all reported together.
    async fn resolve_targets(
        &self,
        targets: &[(usize, PublishTarget)],
    ) -> Result<Vec<ResolvedTarget>, DispatchError> {
        let mut apps: HashMap<String, Option<Application>> = HashMap::new();
        for (_, target) in targets {
            if !apps.contains_key(&target.app_key) {
                let app = self
                    .db
                    .find_application_by_key(&target.app_key)
                    .await?
                    .filter(|a| a.is_active);
                apps.insert(target.app_key.clone(), app);
            }
        }

        let mut report = ValidationReport::new();
        for (index, target) in targets {
            if apps.get(&target.app_key).is_none_or(Option::is_none) {
                report.missing_app(format!("targets[{index}].appKey"), &target.app_key);
            }
        }
        report.into_result()?;

        let mut resolved = Vec::with_capacity(targets.len());
        let mut report = ValidationReport::new();
        for (index, target) in targets {
            let Some(Some(app)) = apps.get(&target.app_key) else {
                continue;
            };
            let version = match target.app_version_id {
                Some(id) => match self.db.find_version(id).await? {
                    Some(v) if v.application_id == app.id => Some(v),
                    Some(_) => {
                        report.add(
                            format!("targets[{index}].appVersionId"),
                            "Version does not belong to the selected application",
                        );
                        None
                    }
                    None => {
                        report.add(
                            format!("targets[{index}].appVersionId"),
                            "Version does not exist",
                        );
                        None
                    }
                },
                None => None,
            };
            resolved.push(ResolvedTarget {
                app: app.clone(),
                version,
            });
        }
        report.into_result()?;

        Ok(resolved)
    }
}

/// Normalize keys and drop repeated `(appKey, appVersionId)` pairs, keeping
/// the first occurrence and its original index for error paths.
fn normalize_targets(
    targets: &[PublishTarget],
    report: &mut ValidationReport,
) -> Vec<(usize, PublishTarget)> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(targets.len());

    for (index, target) in targets.iter().enumerate() {
        let app_key = normalize_app_key(&target.app_key);
        report.require(&format!("targets[{index}].appKey"), &app_key, MAX_APP_KEY_LEN);
        if let Some(id) = target.app_version_id
            && id < 1
        {
            report.add(
                format!("targets[{index}].appVersionId"),
                "Must be a positive id",
            );
        }

        if seen.insert((app_key.clone(), target.app_version_id)) {
            out.push((
                index,
                PublishTarget {
                    app_key,
                    app_version_id: target.app_version_id,
                },
            ));
        }
    }

    out
}

/// Publish and notification management errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(ValidationReport),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Attachment storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<ValidationReport> for DispatchError {
    fn from(report: ValidationReport) -> Self {
        Self::Validation(report)
    }
}

impl From<DatabaseError> for DispatchError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Database(other.to_string()),
        }
    }
}
