//! Integration tests for supabase-backend.
//!
//! Most tests run offline. Tests that talk to a real project need
//! `MECANICA_SUPABASE_URL`, `MECANICA_SUPABASE_ANON_KEY`, `MECANICA_EMAIL`
//! and `MECANICA_PASSWORD` set and are ignored by default:
//!
//!   cargo test --test integration_tests -- --ignored

use std::time::Duration;

use mecanica_core::{AuthProvider, Backend, BackendError, Collection, Query};
use supabase_backend::{ConfigError, ReconnectConfig, SupabaseClient, SupabaseConfig};

fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    }
}

// ============================================================================
// Unit tests (no backend required)
// ============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn test_config_new_trims_trailing_slash() {
        let config = SupabaseConfig::new("https://xyz.supabase.co/", "anon").unwrap();
        assert_eq!(config.url, "https://xyz.supabase.co");
        assert!(config.realtime_url.is_none());
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_rejects_bad_url() {
        let err = SupabaseConfig::new("xyz.supabase.co", "anon").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }

    #[test]
    fn test_config_rejects_empty_key() {
        let err = SupabaseConfig::new("https://xyz.supabase.co", "  ").unwrap_err();
        assert_eq!(err, ConfigError::Missing("MECANICA_SUPABASE_ANON_KEY"));
    }

    #[test]
    fn test_config_from_lookup() {
        let vars = [
            ("MECANICA_SUPABASE_URL", "https://xyz.supabase.co"),
            ("MECANICA_SUPABASE_ANON_KEY", "anon"),
            ("MECANICA_REALTIME_URL", "https://feed.example.com/sse/"),
        ];
        let config = SupabaseConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.anon_key, "anon");
        assert_eq!(
            config.realtime_url.as_deref(),
            Some("https://feed.example.com/sse")
        );
    }

    #[test]
    fn test_config_realtime_attempts() {
        let vars = [
            ("MECANICA_SUPABASE_URL", "https://xyz.supabase.co"),
            ("MECANICA_SUPABASE_ANON_KEY", "anon"),
            ("MECANICA_REALTIME_MAX_ATTEMPTS", " 5 "),
        ];
        let config = SupabaseConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.reconnect.max_attempts, Some(5));
        assert_eq!(config.reconnect.next_delay(5), None);

        let tuned = config.with_reconnect(ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            ..ReconnectConfig::default()
        });
        assert_eq!(tuned.reconnect.max_attempts, None);
        assert_eq!(tuned.reconnect.next_delay(1), Some(Duration::from_secs(1)));

        let bad = [
            ("MECANICA_SUPABASE_URL", "https://xyz.supabase.co"),
            ("MECANICA_SUPABASE_ANON_KEY", "anon"),
            ("MECANICA_REALTIME_MAX_ATTEMPTS", "sempre"),
        ];
        let err = SupabaseConfig::from_lookup(lookup(&bad)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_config_from_lookup_missing_url() {
        let vars = [("MECANICA_SUPABASE_ANON_KEY", "anon")];
        let err = SupabaseConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(err, ConfigError::Missing("MECANICA_SUPABASE_URL"));
    }

    #[test]
    fn test_config_urls() {
        let config = SupabaseConfig::new("https://xyz.supabase.co", "anon").unwrap();
        assert_eq!(
            config.rest_url(Collection::SectorGroups),
            "https://xyz.supabase.co/rest/v1/sector_groups"
        );
        assert_eq!(
            config.auth_url("token"),
            "https://xyz.supabase.co/auth/v1/token"
        );
        assert_eq!(
            config.realtime_events_url(Collection::Tickets),
            "https://xyz.supabase.co/realtime/v1/sse?table=tickets"
        );
    }

    #[test]
    fn test_config_storage_urls_encode_segments() {
        let config = SupabaseConfig::new("https://xyz.supabase.co", "anon").unwrap();
        assert_eq!(
            config.storage_upload_url("chat-attachments", "u1/foto da peça.png"),
            "https://xyz.supabase.co/storage/v1/object/chat-attachments/u1/foto%20da%20pe%C3%A7a.png"
        );
        assert_eq!(
            config.public_object_url("chat-attachments", "u1/a.pdf"),
            "https://xyz.supabase.co/storage/v1/object/public/chat-attachments/u1/a.pdf"
        );
    }

    #[test]
    fn test_config_custom_realtime_url() {
        let config = SupabaseConfig::new("https://xyz.supabase.co", "anon")
            .unwrap()
            .with_realtime_url("https://feed.example.com/sse");
        assert_eq!(
            config.realtime_events_url(Collection::ActivityLogs),
            "https://feed.example.com/sse?table=activity_logs"
        );
    }
}

mod client_tests {
    use super::*;

    #[test]
    fn test_client_name() {
        let config = SupabaseConfig::new("https://xyz.supabase.co", "anon").unwrap();
        let client = SupabaseClient::new(config).unwrap();
        assert_eq!(client.name(), "supabase");
    }

    #[tokio::test]
    async fn test_no_session_initially() {
        let config = SupabaseConfig::new("https://xyz.supabase.co", "anon").unwrap();
        let client = SupabaseClient::new(config).unwrap();
        assert!(client.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_without_session_emits_signed_out() {
        let config = SupabaseConfig::new("https://xyz.supabase.co", "anon").unwrap();
        let client = SupabaseClient::new(config).unwrap();
        let mut events = client.session_events();

        client.sign_out().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            mecanica_core::SessionEvent::SignedOut
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let config = SupabaseConfig::new("http://127.0.0.1:9", "anon")
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        let client = SupabaseClient::new(config).unwrap();

        let err = client
            .fetch_collection(Collection::Tickets, &Query::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}

// ============================================================================
// Live tests (require a real project)
// ============================================================================

mod live_tests {
    use super::*;

    fn credentials() -> Option<(String, String)> {
        let _ = dotenvy::dotenv();
        Some((
            std::env::var("MECANICA_EMAIL").ok()?,
            std::env::var("MECANICA_PASSWORD").ok()?,
        ))
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_sign_in_and_fetch_profiles() {
        let Some((email, password)) = credentials() else {
            eprintln!("MECANICA_EMAIL/MECANICA_PASSWORD not set, skipping");
            return;
        };
        let client = SupabaseClient::new(SupabaseConfig::from_env().unwrap()).unwrap();

        let session = client.sign_in_with_password(&email, &password).await.unwrap();
        let rows = client
            .fetch_collection(Collection::Profiles, &Query::by_id(session.user.id.clone()))
            .await
            .unwrap();
        assert!(rows.len() <= 1);

        client.sign_out().await.unwrap();
    }
}
