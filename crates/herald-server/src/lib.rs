//! Herald server library.
//!
//! Notification fan-out and delivery tracking for registered applications:
//! - Application and release registry ([`versions`])
//! - Publish pipeline with per-device delivery records ([`dispatcher`], [`ledger`])
//! - In-process live fan-out to stream subscribers ([`hub`])
//! - Attachment storage ([`attachments`])
//! - HTTP API ([`api`])

pub mod api;
pub mod attachments;
pub mod dispatcher;
pub mod hub;
pub mod ledger;
pub mod storage;
pub mod validation;
pub mod versions;
