//! Per-device delivery tracking.
//!
//! Records move `pending → delivered → read` and never back. Every write is a
//! database upsert on `(device_id, notification_id)`, so several server
//! instances may share one database.

use tracing::{debug, info, warn};

use crate::storage::{DatabaseError, DeliveryRecord, Device, HeraldDatabase, InboxEntry};
use crate::validation::{self, ValidationReport};

/// Result of creating pending records for freshly published notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub devices: usize,
    /// Records created. Existing records are left alone and not counted.
    pub created: usize,
    /// Individual inserts that failed and were skipped.
    pub failed: usize,
}

/// A device's inbox after delivery.
#[derive(Debug, Clone)]
pub struct Inbox {
    pub device: Device,
    pub entries: Vec<InboxEntry>,
}

/// Delivery state machine over the shared database.
#[derive(Clone)]
pub struct DeliveryLedger {
    db: HeraldDatabase,
}

impl DeliveryLedger {
    pub const fn new(db: HeraldDatabase) -> Self {
        Self { db }
    }

    /// Create a pending record for every known device and each notification.
    ///
    /// Each notification fans out in one statement. When that statement fails
    /// the notification is retried one device at a time, and a failing insert
    /// is logged and skipped without stopping the others.
    pub async fn create_pending(
        &self,
        notification_ids: &[i64],
    ) -> Result<FanOutReport, LedgerError> {
        if notification_ids.is_empty() {
            return Ok(FanOutReport::default());
        }

        let devices = self.db.count_devices().await?;
        let mut report = FanOutReport {
            devices: to_count(devices),
            ..FanOutReport::default()
        };
        if devices == 0 {
            return Ok(report);
        }

        let mut device_ids: Option<Vec<String>> = None;
        for &notification_id in notification_ids {
            match self.db.insert_pending_for_all_devices(notification_id).await {
                Ok(created) => report.created += to_count(created),
                Err(e) => {
                    warn!(
                        notification_id,
                        error = %e,
                        "Bulk fan-out failed, inserting per device"
                    );
                    if device_ids.is_none() {
                        device_ids = Some(self.db.list_device_ids().await?);
                    }
                    let ids = device_ids.as_deref().unwrap_or_default();
                    self.create_pending_per_device(notification_id, ids, &mut report).await;
                }
            }
        }

        debug!(
            devices = report.devices,
            created = report.created,
            failed = report.failed,
            "Pending delivery records created"
        );

        Ok(report)
    }

    async fn create_pending_per_device(
        &self,
        notification_id: i64,
        device_ids: &[String],
        report: &mut FanOutReport,
    ) {
        for device_id in device_ids {
            match self.db.insert_pending_record(device_id, notification_id).await {
                Ok(true) => report.created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        device_id = %device_id,
                        notification_id,
                        error = %e,
                        "Failed to create pending delivery record"
                    );
                    report.failed += 1;
                }
            }
        }
    }

    /// Fetch a device's inbox, registering the device if it is new.
    ///
    /// Pending records become delivered, and active notifications without a
    /// record are backfilled as delivered. Read entries are omitted unless
    /// `include_read`. A blank device id is rejected before anything is
    /// written.
    pub async fn fetch_inbox(
        &self,
        device_id: &str,
        include_read: bool,
    ) -> Result<Inbox, LedgerError> {
        let device_id = validation::device_id(device_id)?;

        let device = self.db.touch_device(device_id).await?;

        let delivery = self.db.deliver_inbox(device_id, include_read).await?;

        if delivery.promoted > 0 || delivery.backfilled > 0 {
            info!(
                device_id = %device_id,
                promoted = delivery.promoted,
                backfilled = delivery.backfilled,
                "Inbox delivered"
            );
        }

        Ok(Inbox {
            device,
            entries: delivery.entries,
        })
    }

    /// Mark a notification read for a device.
    ///
    /// Creates the record directly as read when none exists. Repeating the
    /// call keeps the first read timestamp.
    pub async fn mark_read(
        &self,
        device_id: &str,
        notification_id: i64,
    ) -> Result<DeliveryRecord, LedgerError> {
        let device_id = validation::device_id(device_id)?;

        if !self.db.notification_exists(notification_id).await? {
            return Err(LedgerError::NotFound(format!(
                "Notification {notification_id}"
            )));
        }

        self.db.touch_device(device_id).await?;

        let record = self
            .db
            .mark_record_read(device_id, notification_id)
            .await?;

        debug!(device_id = %device_id, notification_id, "Notification marked read");

        Ok(record)
    }
}

fn to_count(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Ledger operation errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationReport),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<DatabaseError> for LedgerError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}
