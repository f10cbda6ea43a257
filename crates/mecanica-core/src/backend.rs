//! Collaborator traits for the hosted backend.
//!
//! The sync engine only talks to persistence, authentication, realtime and
//! blob storage through these traits. Implementations must be object-safe so
//! they can be shared as `Arc<dyn Backend>`.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::collection::Collection;
use crate::error::BackendError;
use crate::normalize::record_id;
use crate::query::Query;
use crate::Record;

/// Kind of a row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change pushed by the realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub collection: Collection,
    /// New row contents (empty for deletes on most backends).
    pub record: Record,
    /// Previous row contents when the backend provides them.
    pub old_record: Option<Record>,
}

impl ChangeEvent {
    pub fn insert(collection: Collection, record: Record) -> Self {
        Self {
            kind: ChangeKind::Insert,
            collection,
            record,
            old_record: None,
        }
    }

    pub fn update(collection: Collection, record: Record) -> Self {
        Self {
            kind: ChangeKind::Update,
            collection,
            record,
            old_record: None,
        }
    }

    pub fn delete(collection: Collection, old_record: Record) -> Self {
        Self {
            kind: ChangeKind::Delete,
            collection,
            record: Record::new(),
            old_record: Some(old_record),
        }
    }

    /// Identifier of the affected row, from the new or the old contents.
    pub fn row_id(&self) -> Option<String> {
        record_id(&self.record).or_else(|| self.old_record.as_ref().and_then(record_id))
    }
}

/// A stream of change events for one collection. Dropping it unsubscribes.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, BackendError>> + Send>>;

/// Collection reads, writes and change subscriptions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Bulk read with optional filters, ordering and limit.
    async fn fetch_collection(
        &self,
        collection: Collection,
        query: &Query,
    ) -> Result<Vec<Record>, BackendError>;

    /// Insert a row and return it as stored.
    async fn insert(&self, collection: Collection, record: Record) -> Result<Record, BackendError>;

    /// Patch one row by identifier and return it as stored.
    ///
    /// A patch that matches no visible row is reported as
    /// [`BackendError::PermissionDenied`].
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Record,
    ) -> Result<Record, BackendError>;

    /// Patch every row matching `query`; returns the rows as stored.
    ///
    /// Rows hidden or protected by authorization are not returned, so the
    /// result is exactly what the write affected.
    async fn update_where(
        &self,
        collection: Collection,
        query: &Query,
        patch: Record,
    ) -> Result<Vec<Record>, BackendError>;

    /// Delete one row by identifier; returns the affected count.
    async fn delete(&self, collection: Collection, id: &str) -> Result<u64, BackendError>;

    /// Subscribe to row changes of one collection.
    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, BackendError>;

    /// Human-readable name of the implementation.
    fn name(&self) -> &str;
}

/// The authenticated user as reported by the session provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: SessionUser,
}

impl Session {
    /// Whether the access token has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

impl SessionEvent {
    /// The session carried by the event, if any.
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionEvent::SignedIn(s) | SessionEvent::TokenRefreshed(s) => Some(s),
            SessionEvent::SignedOut => None,
        }
    }
}

/// Authentication and session provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The current session, if any.
    async fn current_session(&self) -> Result<Option<Session>, BackendError>;

    /// Sign in with an email/password pair.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError>;

    /// Sign out remotely.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Subscribe to session changes. Dropping the receiver unsubscribes.
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Object storage for chat attachments.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload bytes and return the object's public URL.
    async fn upload_blob(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError>;
}
