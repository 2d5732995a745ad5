//! Notification queries, including the retention purge.

use herald_core::db::DatabaseError;

use super::db::HeraldDatabase;
use super::models::{Notification, NotificationDetail};

/// Shared content of the notification rows created by one publish.
pub struct NewNotification<'a> {
    pub title: &'a str,
    pub message: &'a str,
    pub link: Option<&'a str>,
    pub file_url: Option<&'a str>,
    pub created_at: i64,
}

/// One destination row: an application and, optionally, the release it announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTarget {
    pub application_id: i64,
    pub app_version_id: Option<i64>,
}

/// Outcome of [`HeraldDatabase::insert_notifications`].
#[derive(Debug, Clone)]
pub struct InsertedNotifications {
    /// Created rows, in target order.
    pub notifications: Vec<Notification>,
    /// Ids removed by the retention limit. Can include rows created by this
    /// same call when one application is targeted more often than the limit.
    pub purged_ids: Vec<i64>,
}

pub(super) const DETAIL_SELECT: &str = "SELECT n.id, n.application_id, n.app_version_id, n.title, \
     n.message, n.link, n.file_url, n.is_active, n.created_at, \
     a.app_key, a.display_name AS app_name, \
     v.version_name, v.platform AS version_platform, v.release_notes AS version_release_notes, \
     v.file_url AS version_file_url, v.file_checksum AS version_file_checksum, \
     v.release_date AS version_release_date";

pub(super) const DETAIL_FROM: &str = "FROM notifications n \
     JOIN applications a ON a.id = n.application_id \
     LEFT JOIN app_versions v ON v.id = n.app_version_id";

impl HeraldDatabase {
    /// Create one notification row per target in a single transaction, then
    /// trim every touched application down to `retention_limit` rows (oldest
    /// first; delivery records cascade).
    pub async fn insert_notifications(
        &self,
        content: &NewNotification<'_>,
        targets: &[NotificationTarget],
        retention_limit: u32,
    ) -> Result<InsertedNotifications, DatabaseError> {
        let mut tx = self.pool().begin().await?;
        let mut notifications = Vec::with_capacity(targets.len());

        for target in targets {
            let row = sqlx::query_as::<_, Notification>(
                "INSERT INTO notifications \
                 (application_id, app_version_id, title, message, link, file_url, is_active, \
                  created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, 1, ?) RETURNING *",
            )
            .bind(target.application_id)
            .bind(target.app_version_id)
            .bind(content.title)
            .bind(content.message)
            .bind(content.link)
            .bind(content.file_url)
            .bind(content.created_at)
            .fetch_one(&mut *tx)
            .await?;
            notifications.push(row);
        }

        let mut app_ids: Vec<i64> = targets.iter().map(|t| t.application_id).collect();
        app_ids.sort_unstable();
        app_ids.dedup();

        let mut purged_ids = Vec::new();
        for application_id in app_ids {
            let rows: Vec<(i64,)> = sqlx::query_as(
                "DELETE FROM notifications WHERE application_id = ? AND id NOT IN \
                 (SELECT id FROM notifications WHERE application_id = ? \
                  ORDER BY created_at DESC, id DESC LIMIT ?) RETURNING id",
            )
            .bind(application_id)
            .bind(application_id)
            .bind(i64::from(retention_limit))
            .fetch_all(&mut *tx)
            .await?;
            purged_ids.extend(rows.into_iter().map(|r| r.0));
        }

        tx.commit().await?;

        Ok(InsertedNotifications {
            notifications,
            purged_ids,
        })
    }

    /// Get a notification with its application and release, active or not.
    pub async fn get_notification_detail(
        &self,
        id: i64,
    ) -> Result<Option<NotificationDetail>, DatabaseError> {
        let sql = format!("{DETAIL_SELECT} {DETAIL_FROM} WHERE n.id = ?");
        let detail = sqlx::query_as::<_, NotificationDetail>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(detail)
    }

    /// Whether an active notification with this id exists.
    pub async fn notification_exists(&self, id: i64) -> Result<bool, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE id = ? AND is_active = 1")
                .bind(id)
                .fetch_one(self.pool())
                .await?;

        Ok(row.0 > 0)
    }

    /// Page through an application's active notifications, newest first.
    pub async fn list_notifications(
        &self,
        application_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<NotificationDetail>, DatabaseError> {
        let sql = format!(
            "{DETAIL_SELECT} {DETAIL_FROM} WHERE n.application_id = ? AND n.is_active = 1 \
             ORDER BY n.created_at DESC, n.id DESC LIMIT ? OFFSET ?"
        );
        let items = sqlx::query_as::<_, NotificationDetail>(&sql)
            .bind(application_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;

        Ok(items)
    }

    /// Count an application's notifications, optionally only the active ones.
    pub async fn count_notifications(
        &self,
        application_id: i64,
        active_only: bool,
    ) -> Result<i64, DatabaseError> {
        let row: (i64,) = if active_only {
            sqlx::query_as(
                "SELECT COUNT(*) FROM notifications WHERE application_id = ? AND is_active = 1",
            )
            .bind(application_id)
            .fetch_one(self.pool())
            .await?
        } else {
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE application_id = ?")
                .bind(application_id)
                .fetch_one(self.pool())
                .await?
        };

        Ok(row.0)
    }

    /// Soft-delete a notification. Returns `false` if it was unknown or already inactive.
    pub async fn deactivate_notification(&self, id: i64) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("UPDATE notifications SET is_active = 0 WHERE id = ? AND is_active = 1")
                .bind(id)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Hard-delete notifications of one application, or of all applications.
    /// Delivery records go with them.
    pub async fn clear_notifications(
        &self,
        application_id: Option<i64>,
    ) -> Result<u64, DatabaseError> {
        let result = if let Some(id) = application_id {
            sqlx::query("DELETE FROM notifications WHERE application_id = ?")
                .bind(id)
                .execute(self.pool())
                .await?
        } else {
            sqlx::query("DELETE FROM notifications")
                .execute(self.pool())
                .await?
        };

        Ok(result.rows_affected())
    }

    /// Name of the release announced by the most recent active notification
    /// that carries one, optionally restricted to one application.
    pub async fn latest_announced_version(
        &self,
        application_id: Option<i64>,
    ) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> = if let Some(id) = application_id {
            sqlx::query_as(
                "SELECT v.version_name FROM notifications n \
                 JOIN app_versions v ON v.id = n.app_version_id \
                 WHERE n.is_active = 1 AND n.application_id = ? \
                 ORDER BY n.created_at DESC, n.id DESC LIMIT 1",
            )
            .bind(id)
            .fetch_optional(self.pool())
            .await?
        } else {
            sqlx::query_as(
                "SELECT v.version_name FROM notifications n \
                 JOIN app_versions v ON v.id = n.app_version_id \
                 WHERE n.is_active = 1 \
                 ORDER BY n.created_at DESC, n.id DESC LIMIT 1",
            )
            .fetch_optional(self.pool())
            .await?
        };

        Ok(row.map(|r| r.0))
    }
}
