//! Best-effort user notifications
//!
//! Delivery runs on a spawned task after the scheduling transaction has
//! committed. A slow or failing sink never affects the booking; failures are
//! logged with PHI redacted.

use async_trait::async_trait;
use logger_redacted::{redacted_warn, PhiRedactor};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::error::CollaboratorError;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: Uuid, message: &str, link: &str) -> Result<(), CollaboratorError>;

    async fn unread_count(&self, user_id: Uuid) -> Result<u64, CollaboratorError>;
}

/// In-app link for an appointment
pub fn appointment_link(appointment_id: Uuid) -> String {
    format!("/appointments/{}", appointment_id)
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Option<Arc<dyn NotificationSink>>,
    unread_counts: Arc<TtlCache<Uuid, u64>>,
    timeout: Duration,
    redactor: Arc<PhiRedactor>,
}

impl NotificationDispatcher {
    pub fn new(
        sink: Option<Arc<dyn NotificationSink>>,
        unread_counts: Arc<TtlCache<Uuid, u64>>,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            unread_counts,
            timeout,
            redactor: Arc::new(PhiRedactor::default()),
        }
    }

    pub fn with_redactor(mut self, redactor: PhiRedactor) -> Self {
        self.redactor = Arc::new(redactor);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share an unread-count cache with other dispatchers
    pub fn with_unread_cache(mut self, unread_counts: Arc<TtlCache<Uuid, u64>>) -> Self {
        self.unread_counts = unread_counts;
        self
    }

    pub fn unread_counts(&self) -> &Arc<TtlCache<Uuid, u64>> {
        &self.unread_counts
    }

    /// Deliver in the background. Returns `None` when no sink is configured.
    pub fn dispatch(&self, user_id: Uuid, message: String, link: String) -> Option<JoinHandle<()>> {
        let sink = Arc::clone(self.sink.as_ref()?);
        let unread_counts = Arc::clone(&self.unread_counts);
        let redactor = Arc::clone(&self.redactor);
        let timeout = self.timeout;

        Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, sink.notify(user_id, &message, &link)).await {
                Ok(Ok(())) => {
                    unread_counts.invalidate(&user_id);
                    debug!(user_id = %user_id, link = %link, "Notification delivered");
                }
                Ok(Err(error)) => {
                    redacted_warn!(redactor, error, user_id = %user_id, "Notification delivery failed");
                }
                Err(_) => {
                    warn!(
                        user_id = %user_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Notification delivery timed out"
                    );
                }
            }
        }))
    }

    /// Unread notifications for `user_id`, served from the cache when fresh
    pub async fn unread_count(&self, user_id: Uuid) -> Option<u64> {
        if let Some(count) = self.unread_counts.get(&user_id) {
            return Some(count);
        }

        let sink = self.sink.as_ref()?;
        match tokio::time::timeout(self.timeout, sink.unread_count(user_id)).await {
            Ok(Ok(count)) => {
                self.unread_counts.insert(user_id, count);
                Some(count)
            }
            Ok(Err(error)) => {
                redacted_warn!(self.redactor, error, user_id = %user_id, "Unread count lookup failed");
                None
            }
            Err(_) => {
                warn!(user_id = %user_id, "Unread count lookup timed out");
                None
            }
        }
    }
}
