//! Application and release queries.

use herald_core::db::{DatabaseError, unix_timestamp};

use super::db::HeraldDatabase;
use super::models::{AppVersion, AppVersionWithApp, Application, ApplicationSummary};

/// Parameters for recording a release.
pub struct NewAppVersion<'a> {
    pub application_id: i64,
    pub version_name: &'a str,
    pub platform: Option<&'a str>,
    pub release_notes: Option<&'a str>,
    pub file_url: &'a str,
    pub file_checksum: Option<&'a str>,
    pub release_date: i64,
}

const VERSION_WITH_APP: &str = "SELECT v.*, a.app_key, a.display_name AS app_name \
     FROM app_versions v JOIN applications a ON a.id = v.application_id";

impl HeraldDatabase {
    // =========================================================================
    // Application queries
    // =========================================================================

    /// Register an application. A duplicate key yields `DatabaseError::Conflict`.
    pub async fn create_application(
        &self,
        app_key: &str,
        display_name: &str,
        description: Option<&str>,
    ) -> Result<Application, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO applications (app_key, display_name, description, is_active, created_at) \
             VALUES (?, ?, ?, 1, ?)",
        )
        .bind(app_key)
        .bind(display_name)
        .bind(description)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_application(app_key).await
    }

    /// Get an application by key (case-insensitive).
    pub async fn get_application(&self, app_key: &str) -> Result<Application, DatabaseError> {
        self.find_application_by_key(app_key)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Application {app_key}")))
    }

    /// Look up an application by key, active or not.
    pub async fn find_application_by_key(
        &self,
        app_key: &str,
    ) -> Result<Option<Application>, DatabaseError> {
        let app = sqlx::query_as::<_, Application>("SELECT * FROM applications WHERE app_key = ?")
            .bind(app_key)
            .fetch_optional(self.pool())
            .await?;

        Ok(app)
    }

    /// List applications ordered by display name, with version and notification counts.
    pub async fn list_applications(&self) -> Result<Vec<ApplicationSummary>, DatabaseError> {
        let apps = sqlx::query_as::<_, ApplicationSummary>(
            "SELECT a.*, \
               (SELECT COUNT(*) FROM app_versions v \
                 WHERE v.application_id = a.id) AS version_count, \
               (SELECT COUNT(*) FROM notifications n \
                 WHERE n.application_id = a.id) AS notification_count \
             FROM applications a ORDER BY a.display_name, a.id",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(apps)
    }

    /// Get one application with its counts.
    pub async fn get_application_summary(
        &self,
        app_key: &str,
    ) -> Result<ApplicationSummary, DatabaseError> {
        sqlx::query_as::<_, ApplicationSummary>(
            "SELECT a.*, \
               (SELECT COUNT(*) FROM app_versions v \
                 WHERE v.application_id = a.id) AS version_count, \
               (SELECT COUNT(*) FROM notifications n \
                 WHERE n.application_id = a.id) AS notification_count \
             FROM applications a WHERE a.app_key = ?",
        )
        .bind(app_key)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Application {app_key}")))
    }

    /// Flip the active flag. Returns `false` if no application has that key.
    pub async fn set_application_active(
        &self,
        app_key: &str,
        active: bool,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE applications SET is_active = ? WHERE app_key = ?")
            .bind(active)
            .bind(app_key)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Release queries
    // =========================================================================

    /// Record a release. A duplicate (application, name, platform) yields
    /// `DatabaseError::Conflict`.
    pub async fn create_app_version(
        &self,
        params: &NewAppVersion<'_>,
    ) -> Result<AppVersion, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "INSERT INTO app_versions \
             (application_id, version_name, platform, release_notes, file_url, file_checksum, \
              release_date, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.application_id)
        .bind(params.version_name)
        .bind(params.platform)
        .bind(params.release_notes)
        .bind(params.file_url)
        .bind(params.file_checksum)
        .bind(params.release_date)
        .bind(now)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        self.find_version(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("AppVersion {id}")))
    }

    /// Whether the application already has this release for this platform.
    pub async fn version_exists(
        &self,
        application_id: i64,
        version_name: &str,
        platform: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM app_versions \
             WHERE application_id = ? AND version_name = ? \
               AND COALESCE(platform, '') = COALESCE(?, '')",
        )
        .bind(application_id)
        .bind(version_name)
        .bind(platform)
        .fetch_one(self.pool())
        .await?;

        Ok(row.0 > 0)
    }

    /// Look up a release by id.
    pub async fn find_version(&self, id: i64) -> Result<Option<AppVersion>, DatabaseError> {
        let version = sqlx::query_as::<_, AppVersion>("SELECT * FROM app_versions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(version)
    }

    /// Look up a release by id together with its application key and name.
    pub async fn find_version_with_app(
        &self,
        id: i64,
    ) -> Result<Option<AppVersionWithApp>, DatabaseError> {
        let sql = format!("{VERSION_WITH_APP} WHERE v.id = ?");
        let version = sqlx::query_as::<_, AppVersionWithApp>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(version)
    }

    /// List releases, newest first, optionally for one application.
    pub async fn list_versions(
        &self,
        app_key: Option<&str>,
    ) -> Result<Vec<AppVersionWithApp>, DatabaseError> {
        let versions = if let Some(key) = app_key {
            let sql = format!(
                "{VERSION_WITH_APP} WHERE a.app_key = ? ORDER BY v.release_date DESC, v.id DESC"
            );
            sqlx::query_as::<_, AppVersionWithApp>(&sql)
                .bind(key)
                .fetch_all(self.pool())
                .await?
        } else {
            let sql = format!("{VERSION_WITH_APP} ORDER BY v.release_date DESC, v.id DESC");
            sqlx::query_as::<_, AppVersionWithApp>(&sql)
                .fetch_all(self.pool())
                .await?
        };

        Ok(versions)
    }

    /// The most recent release of an application (release date, then id).
    pub async fn latest_version(
        &self,
        application_id: i64,
    ) -> Result<Option<AppVersion>, DatabaseError> {
        let version = sqlx::query_as::<_, AppVersion>(
            "SELECT * FROM app_versions WHERE application_id = ? \
             ORDER BY release_date DESC, id DESC LIMIT 1",
        )
        .bind(application_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(version)
    }
}
