//! User-facing notifications ("toasts").
//!
//! Notifications are fire-and-forget: they go out on a broadcast channel and
//! carry their own expiry so a view can dismiss them without a timer of its
//! own. Nothing is lost if no one is listening.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::SyncError;

const CHANNEL_CAPACITY: usize = 64;

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    /// Authorization refused or filtered the operation.
    Permission,
}

/// A dismissible, non-blocking message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Publishes notifications to any number of subscribers.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
    ttl: Duration,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, ttl }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Expiry for a notification published at `now`. A lifetime past the
    /// representable range never expires.
    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn publish(&self, kind: NotificationKind, message: impl Into<String>) {
        let notification = Notification {
            kind,
            message: message.into(),
            expires_at: self.expiry(Utc::now()),
        };
        debug!(kind = ?notification.kind, "{}", notification.message);
        let _ = self.tx.send(notification);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.publish(NotificationKind::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(NotificationKind::Error, message);
    }

    /// Report a failed operation. Cancellations are not reported.
    pub fn failure(&self, err: &SyncError, context: &str) {
        if err.is_cancelled() {
            return;
        }
        self.publish(err.notification_kind(), err.user_message(context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mecanica_core::{BackendError, Collection};

    #[tokio::test]
    async fn test_notification_expiry() {
        let notifier = Notifier::new(Duration::from_secs(3));
        let mut rx = notifier.subscribe();

        notifier.success("Chamado aceito com sucesso!");
        let n = rx.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::Success);
        assert!(!n.is_expired_at(Utc::now()));
        assert!(n.is_expired_at(Utc::now() + chrono::Duration::seconds(4)));
    }

    #[tokio::test]
    async fn test_failure_kinds() {
        let notifier = Notifier::new(Duration::from_secs(3));
        let mut rx = notifier.subscribe();

        notifier.failure(
            &SyncError::PermissionDenied {
                collection: Collection::Tickets,
                id: "t9".into(),
            },
            "excluir chamado",
        );
        notifier.failure(&SyncError::from(BackendError::Cancelled), "x");
        notifier.failure(&SyncError::from(BackendError::Transport("down".into())), "y");

        assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::Permission);
        assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::Error);
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let notifier = Notifier::new(Duration::from_secs(u64::MAX));
        let mut rx = notifier.subscribe();

        notifier.error("sem prazo");
        let n = rx.recv().await.unwrap();
        assert_eq!(n.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!n.is_expired_at(Utc::now()));

        let near_limit = Notifier::new(Duration::from_secs(60 * 60 * 24 * 365 * 300_000));
        assert_eq!(near_limit.expiry(Utc::now()), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_publish_without_subscribers() {
        Notifier::new(Duration::from_secs(1)).error("ninguém ouvindo");
    }
}
