//! In-process live fan-out of notification events.
//!
//! Each subscriber owns a bounded queue. `publish` snapshots the matching
//! senders under a short read lock and enqueues with `try_send`, so it never
//! waits on a consumer. A subscriber whose queue is full or closed is treated
//! as broken and removed from the registry, which ends its stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

use crate::storage::{NotificationDetail, VersionSummary};

/// One live notification as seen by stream subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub app_key: String,
    pub app_name: String,
    pub notification_id: i64,
    pub title: String,
    pub message: String,
    pub created_at: i64,
    pub link: Option<String>,
    pub file_url: Option<String>,
    pub app_version: Option<VersionSummary>,
}

impl From<&NotificationDetail> for NotificationEvent {
    fn from(detail: &NotificationDetail) -> Self {
        Self {
            app_key: detail.app_key.clone(),
            app_name: detail.app_name.clone(),
            notification_id: detail.id,
            title: detail.title.clone(),
            message: detail.message.clone(),
            created_at: detail.created_at,
            link: detail.link.clone(),
            file_url: detail.file_url.clone(),
            app_version: detail.version(),
        }
    }
}

/// Outcome of one [`BroadcastHub::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the event was enqueued for.
    pub delivered: usize,
    /// Subscribers torn down because their queue rejected the event.
    pub dropped: usize,
}

struct Subscriber {
    sender: mpsc::Sender<Arc<NotificationEvent>>,
    /// Lowercased application key, `None` for every application.
    app_key: Option<String>,
}

impl Subscriber {
    fn accepts(&self, app_key: &str) -> bool {
        self.app_key
            .as_deref()
            .is_none_or(|filter| filter.eq_ignore_ascii_case(app_key))
    }
}

/// Registry of live subscribers.
pub struct BroadcastHub {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    closed: AtomicBool,
}

impl BroadcastHub {
    /// Create a hub whose subscriber queues hold `queue_capacity` events.
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Register a subscriber, optionally scoped to one application key.
    ///
    /// The returned [`Subscription`] yields events published from now on and
    /// unregisters itself when dropped. After [`shutdown`](Self::shutdown) the
    /// subscription ends immediately.
    pub fn subscribe(self: &Arc<Self>, app_key: Option<&str>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let app_key = app_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase);

        let mut subscribers = self.subscribers.write();
        if !self.closed.load(Ordering::Acquire) {
            subscribers.insert(
                id,
                Subscriber {
                    sender,
                    app_key: app_key.clone(),
                },
            );
        }
        let count = subscribers.len();
        drop(subscribers);

        info!(
            subscriber_id = id,
            app_key = ?app_key,
            subscribers = count,
            "Live subscriber registered"
        );

        Subscription {
            id,
            receiver,
            hub: Arc::downgrade(self),
        }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!(subscriber_id = id, "Live subscriber removed");
        }
        removed
    }

    /// Enqueue `event` for every subscriber whose filter matches.
    ///
    /// Never blocks on a consumer. Subscribers that cannot take the event are
    /// torn down; the others are unaffected.
    pub fn publish(&self, event: NotificationEvent) -> PublishReport {
        let snapshot: Vec<(u64, mpsc::Sender<Arc<NotificationEvent>>)> = self
            .subscribers
            .read()
            .iter()
            .filter(|(_, sub)| sub.accepts(&event.app_key))
            .map(|(id, sub)| (*id, sub.sender.clone()))
            .collect();

        if snapshot.is_empty() {
            return PublishReport::default();
        }

        let event = Arc::new(event);
        let mut report = PublishReport::default();
        let mut broken = Vec::new();

        for (id, sender) in snapshot {
            match sender.try_send(Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber_id = id,
                        notification_id = event.notification_id,
                        "Live subscriber queue full, dropping subscriber"
                    );
                    broken.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber_id = id, "Live subscriber already closed");
                    broken.push(id);
                }
            }
        }

        if !broken.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &broken {
                if subscribers.remove(id).is_some() {
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Drop every subscriber and refuse new ones. Open streams end once they
    /// have drained what was already queued.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let removed = {
            let mut subscribers = self.subscribers.write();
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        info!(subscribers = removed, "Broadcast hub shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A live subscriber's event stream.
///
/// Dropping it unregisters the subscriber from the hub.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Arc<NotificationEvent>>,
    hub: Weak<BroadcastHub>,
}

impl Subscription {
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the subscriber has been removed
    /// and its queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<NotificationEvent>> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Arc<NotificationEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
