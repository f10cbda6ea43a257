//! In-memory collaborators for exercising the MecânicaPro sync engine.
//!
//! This crate provides mock implementations of the `mecanica-core` traits:
//! - `MemoryBackend` - Tables in memory, change broadcasting, fault injection
//! - `MemoryAuth` - Email/password accounts and a session event channel
//! - `MemoryBlobStore` - Object uploads kept in memory
//! - `DelayedBackend` - Wraps another backend with artificial latency
//!
//! For the hosted backend, use the `supabase-backend` crate instead.
//!
//! # Example
//!
//! ```rust
//! use mock_backend::{Backend, Collection, MemoryBackend, Query};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mock_backend::BackendError> {
//!     let backend = MemoryBackend::new();
//!     backend
//!         .seed(Collection::Tickets, [json!({ "id": "t1", "status": "Em Aberto" })])
//!         .await;
//!
//!     let rows = backend.fetch_collection(Collection::Tickets, &Query::new()).await?;
//!     assert_eq!(rows.len(), 1);
//!     Ok(())
//! }
//! ```

mod auth;
mod blob;
mod delayed;
mod memory;

pub use mecanica_core::{
    async_trait, AuthProvider, Backend, BackendError, BlobStore, ChangeEvent, ChangeKind,
    ChangeStream, Collection, Query, Record, Session, SessionEvent, SessionUser,
};

pub use auth::MemoryAuth;
pub use blob::{MemoryBlobStore, StoredObject};
pub use delayed::DelayedBackend;
pub use memory::MemoryBackend;

/// Convert a JSON object literal into a raw row. Non-objects become empty rows.
pub fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Record::new(),
    }
}
