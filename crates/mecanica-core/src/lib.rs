//! Core types for the MecânicaPro maintenance-ticketing client.
//!
//! This crate provides the shared vocabulary of the workspace:
//!
//! - [`models`] - Canonical in-memory records (tickets, users, messages, ...)
//! - [`normalize`] - The field normalizer that maps raw rows onto those records
//! - [`roster`] - Roster lookups and job-role name resolution
//! - [`Backend`] / [`AuthProvider`] / [`BlobStore`] - The collaborator traits
//!   implemented by the hosted backend client and by the in-memory mock
//! - [`BackendError`] - Errors reported across that boundary
//!
//! # Example
//!
//! ```rust
//! use mecanica_core::{ChatMessage, Normalize, Record};
//! use serde_json::json;
//!
//! let raw: Record = json!({ "id": "m1", "senderid": "u1", "receiver_id": "u2", "text": "oi" })
//!     .as_object()
//!     .cloned()
//!     .unwrap();
//!
//! let message = ChatMessage::normalize(&raw);
//! assert_eq!(message.sender_id, "u1");
//! assert_eq!(ChatMessage::normalize(&message.to_record()), message);
//! ```

pub mod attachment;
pub mod backend;
pub mod collection;
pub mod error;
pub mod models;
pub mod normalize;
pub mod query;
pub mod roster;

pub use backend::{
    AuthProvider, Backend, BlobStore, ChangeEvent, ChangeKind, ChangeStream, Session,
    SessionEvent, SessionUser,
};
pub use collection::Collection;
pub use error::BackendError;
pub use models::*;
pub use normalize::{record_id, snake_case_keys, Normalize};
pub use query::{Filter, FilterOp, Order, Query};
pub use roster::{resolve_role, resolve_roles, Roster};

// Re-export async_trait for implementors
pub use async_trait::async_trait;

/// A raw row as delivered by the backend.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
