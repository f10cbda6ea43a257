//! Hosted backend client for MecânicaPro.
//!
//! This crate implements the collaborator traits from `mecanica-core` over
//! the hosted backend's HTTP surface:
//!
//! - Collection reads and writes through the REST API ([`Backend`])
//! - Password sign-in, token refresh and sign-out ([`AuthProvider`])
//! - Attachment uploads to object storage ([`BlobStore`])
//! - Row change feeds over Server-Sent Events
//!
//! # Example
//!
//! ```no_run
//! use mecanica_core::{AuthProvider, Backend, Collection, Query};
//! use supabase_backend::{SupabaseClient, SupabaseConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SupabaseClient::new(SupabaseConfig::from_env()?)?;
//! client.sign_in_with_password("ana@fabrica.com", "secret").await?;
//!
//! let open = Query::new().eq("status", "Em Aberto");
//! let rows = client.fetch_collection(Collection::Tickets, &open).await?;
//! println!("{} open tickets", rows.len());
//! # Ok(())
//! # }
//! ```
//!
//! [`Backend`]: mecanica_core::Backend
//! [`AuthProvider`]: mecanica_core::AuthProvider
//! [`BlobStore`]: mecanica_core::BlobStore

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod realtime;
pub mod storage;

pub use client::SupabaseClient;
pub use config::{ConfigError, SupabaseConfig};
pub use error::SupabaseError;
pub use realtime::{ChangeFeed, ReconnectConfig};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
