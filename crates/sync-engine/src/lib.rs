//! Client-side state for MecânicaPro.
//!
//! This crate keeps a local, eventually consistent copy of the backend's
//! collections and the signed-in identity:
//!
//! - [`SessionTracker`] - Session state machine with cancellable profile
//!   enrichment and a loading fail-safe
//! - [`SyncStore`] - The snapshot of every collection, atomic refresh and the
//!   mutation helpers
//! - [`RealtimeEngine`] - Per-channel subscriptions merged into the store
//! - [`merge`] - Pure reducers used by the realtime path
//! - [`Notifier`] - Dismissible user notifications
//! - [`report`] - Productivity and activity reports over a period
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use mock_backend::{Collection, MemoryAuth, MemoryBackend};
//! use serde_json::json;
//! use sync_engine::{RealtimeEngine, SessionTracker, SyncConfig, SyncStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sync_engine::SyncError> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     backend
//!         .seed(Collection::Tickets, [json!({ "id": "t1", "status": "Em Aberto" })])
//!         .await;
//!     let auth = Arc::new(MemoryAuth::new());
//!     auth.add_account("ana@fabrica.com", "segredo", "u1").await;
//!
//!     let config = SyncConfig::default();
//!     let session = SessionTracker::new(auth, backend.clone(), config.clone());
//!     session.start().await?;
//!     session.sign_in("ana@fabrica.com", "segredo").await?;
//!
//!     let store = Arc::new(SyncStore::new(backend, session.subscribe(), config));
//!     store.refresh().await;
//!     let realtime = RealtimeEngine::start(store.clone()).await;
//!
//!     store.accept_ticket("t1").await?;
//!     assert_eq!(store.snapshot().tickets[0].mechanic_id.as_deref(), Some("u1"));
//!
//!     realtime.stop().await;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod activity;
pub mod config;
pub mod error;
pub mod merge;
pub mod notify;
pub mod realtime;
pub mod report;
pub mod session;
pub mod store;

pub use actions::{NewTicket, OutgoingMessage, TicketEdit, TEMP_ID_PREFIX};
pub use activity::TicketAction;
pub use config::{ConfigError, SyncConfig};
pub use error::{Result, SyncError};
pub use merge::{Change, MergeOrder, Mergeable};
pub use notify::{Notification, NotificationKind, Notifier};
pub use realtime::{RealtimeEngine, RealtimeHandle};
pub use report::{DateRange, MechanicStats, ProductivityReport, ReportPeriod};
pub use session::{AuthState, SessionTracker};
pub use store::{RefreshReport, Snapshot, StoreChange, SyncStore};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
