//! SQLite storage for the Herald server.
//!
//! Provides persistence for applications, release versions, notifications,
//! devices and per-device delivery records.

mod db;
mod models;
mod queries_apps;
mod queries_devices;
mod queries_notifications;


pub use db::HeraldDatabase;
pub use herald_core::db::DatabaseError;
pub use models::*;
pub use queries_apps::NewAppVersion;
pub use queries_devices::InboxDelivery;
pub use queries_notifications::{InsertedNotifications, NewNotification, NotificationTarget};
