//! Device and delivery record queries.
//!
//! Every delivery record write is an `INSERT ... ON CONFLICT` upsert on the
//! `(device_id, notification_id)` primary key, so concurrent writers sharing
//! the database can never produce duplicates or move a record backwards.

use herald_core::db::{DatabaseError, unix_timestamp};

use super::db::HeraldDatabase;
use super::models::{DeliveryRecord, Device, InboxEntry};
use super::queries_notifications::{DETAIL_FROM, DETAIL_SELECT};

/// Outcome of [`HeraldDatabase::deliver_inbox`].
#[derive(Debug, Clone)]
pub struct InboxDelivery {
    pub entries: Vec<InboxEntry>,
    /// Records created directly as delivered because none existed.
    pub backfilled: u64,
    /// Records moved from pending to delivered.
    pub promoted: u64,
}

impl HeraldDatabase {
    // =========================================================================
    // Device queries
    // =========================================================================

    /// Create the device if unknown, and refresh its `last_seen`.
    pub async fn touch_device(&self, device_id: &str) -> Result<Device, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO devices (device_id, last_seen) VALUES (?, ?) \
             ON CONFLICT(device_id) DO UPDATE SET last_seen = excluded.last_seen",
        )
        .bind(device_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_device(device_id).await
    }

    /// Upsert a device with the version it runs.
    ///
    /// `card_code`: `None` leaves the stored code untouched, `Some(None)` clears it.
    pub async fn report_device_version(
        &self,
        device_id: &str,
        version: &str,
        card_code: Option<Option<&str>>,
    ) -> Result<Device, DatabaseError> {
        let now = unix_timestamp();
        let update_card = card_code.is_some();
        let card = card_code.flatten();

        sqlx::query(
            "INSERT INTO devices (device_id, card_code, current_version, last_seen) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(device_id) DO UPDATE SET \
               current_version = excluded.current_version, \
               last_seen = excluded.last_seen, \
               card_code = CASE WHEN ? THEN excluded.card_code ELSE devices.card_code END",
        )
        .bind(device_id)
        .bind(card)
        .bind(version)
        .bind(now)
        .bind(update_card)
        .execute(self.pool())
        .await?;

        self.get_device(device_id).await
    }

    /// Get a device by id.
    pub async fn get_device(&self, device_id: &str) -> Result<Device, DatabaseError> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Device {device_id}")))
    }

    /// Ids of every known device.
    pub async fn list_device_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT device_id FROM devices ORDER BY device_id")
                .fetch_all(self.pool())
                .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn count_devices(&self) -> Result<u64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices")
            .fetch_one(self.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    // =========================================================================
    // Delivery record queries
    // =========================================================================

    /// Insert a pending record. Returns `false` when one already existed, in
    /// whatever state.
    pub async fn insert_pending_record(
        &self,
        device_id: &str,
        notification_id: i64,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "INSERT INTO delivery_records (device_id, notification_id, status, created_at) \
             VALUES (?, ?, 'pending', ?) \
             ON CONFLICT(device_id, notification_id) DO NOTHING",
        )
        .bind(device_id)
        .bind(notification_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert a pending record for every known device in one statement.
    /// Returns how many records were created; existing ones are untouched.
    pub async fn insert_pending_for_all_devices(
        &self,
        notification_id: i64,
    ) -> Result<u64, DatabaseError> {
        let now = unix_timestamp();

        // SQLite needs the WHERE to parse ON CONFLICT after a SELECT.
        let result = sqlx::query(
            "INSERT INTO delivery_records (device_id, notification_id, status, created_at) \
             SELECT device_id, ?, 'pending', ? FROM devices WHERE true \
             ON CONFLICT(device_id, notification_id) DO NOTHING",
        )
        .bind(notification_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Get the record for one (device, notification) pair.
    pub async fn get_delivery_record(
        &self,
        device_id: &str,
        notification_id: i64,
    ) -> Result<Option<DeliveryRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, DeliveryRecord>(
            "SELECT * FROM delivery_records WHERE device_id = ? AND notification_id = ?",
        )
        .bind(device_id)
        .bind(notification_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(record)
    }

    /// Count records for a notification (all devices).
    pub async fn count_delivery_records(
        &self,
        notification_id: i64,
    ) -> Result<i64, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_records WHERE notification_id = ?")
                .bind(notification_id)
                .fetch_one(self.pool())
                .await?;

        Ok(row.0)
    }

    /// Deliver a device's inbox in one transaction.
    ///
    /// 1. Active notifications with no record for the device get one, created
    ///    directly as `delivered`.
    /// 2. The device's `pending` records become `delivered`.
    /// 3. Records are returned newest notification first, without `read`
    ///    ones unless `include_read`.
    ///
    /// The device row must already exist.
    pub async fn deliver_inbox(
        &self,
        device_id: &str,
        include_read: bool,
    ) -> Result<InboxDelivery, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        // The SELECT needs a WHERE clause for SQLite to accept the upsert.
        let backfilled = sqlx::query(
            "INSERT INTO delivery_records \
             (device_id, notification_id, status, delivered_at, created_at) \
             SELECT ?, n.id, 'delivered', ?, ? FROM notifications n WHERE n.is_active = 1 \
             ON CONFLICT(device_id, notification_id) DO NOTHING",
        )
        .bind(device_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let promoted = sqlx::query(
            "UPDATE delivery_records SET status = 'delivered', delivered_at = ? \
             WHERE device_id = ? AND status = 'pending' \
               AND notification_id IN (SELECT id FROM notifications WHERE is_active = 1)",
        )
        .bind(now)
        .bind(device_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let read_filter = if include_read {
            ""
        } else {
            "AND d.status <> 'read'"
        };
        let sql = format!(
            "{DETAIL_SELECT}, d.status, d.delivered_at, d.read_at {DETAIL_FROM} \
             JOIN delivery_records d ON d.notification_id = n.id \
             WHERE d.device_id = ? AND n.is_active = 1 {read_filter} \
             ORDER BY n.created_at DESC, n.id DESC"
        );
        let entries = sqlx::query_as::<_, InboxEntry>(&sql)
            .bind(device_id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(InboxDelivery {
            entries,
            backfilled,
            promoted,
        })
    }

    /// Mark a record read, creating it if absent.
    ///
    /// The first read timestamp wins: repeating the call keeps `read_at`.
    /// The device and the notification must exist.
    pub async fn mark_record_read(
        &self,
        device_id: &str,
        notification_id: i64,
    ) -> Result<DeliveryRecord, DatabaseError> {
        let now = unix_timestamp();

        let record = sqlx::query_as::<_, DeliveryRecord>(
            "INSERT INTO delivery_records \
             (device_id, notification_id, status, delivered_at, read_at, created_at) \
             VALUES (?, ?, 'read', ?, ?, ?) \
             ON CONFLICT(device_id, notification_id) DO UPDATE SET \
               status = 'read', \
               delivered_at = COALESCE(delivery_records.delivered_at, excluded.delivered_at), \
               read_at = COALESCE(delivery_records.read_at, excluded.read_at) \
             RETURNING *",
        )
        .bind(device_id)
        .bind(notification_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(record)
    }
}
