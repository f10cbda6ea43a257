//! Password authentication and session management.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mecanica_core::{AuthProvider, BackendError, Session, SessionEvent, SessionUser};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::client::SupabaseClient;
use crate::error::SupabaseError;

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| now + ChronoDuration::seconds(secs)));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: SessionUser {
                id: self.user.id,
                email: self.user.email,
            },
        }
    }
}

impl SupabaseClient {
    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, SupabaseError> {
        let url = self.config().auth_url("token");
        let request = self
            .http_client()
            .post(&url)
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.config().anon_key)
            .json(&body);

        let token: TokenResponse = self.send_json(request).await?;
        Ok(token.into_session(Utc::now()))
    }

    /// Exchange a refresh token for a new session.
    async fn refresh(&self, refresh_token: &str) -> Result<Session, SupabaseError> {
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    /// Install a session obtained elsewhere (e.g., restored from disk).
    pub async fn restore_session(&self, session: Session) {
        *self.session.write().await = Some(session.clone());
        let _ = self.events.send(SessionEvent::SignedIn(session));
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let current = self.session.read().await.clone();
        let Some(session) = current else {
            return Ok(None);
        };

        if !session.is_expired_at(Utc::now()) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            warn!("Session expired without a refresh token");
            *self.session.write().await = None;
            self.publish(SessionEvent::SignedOut);
            return Ok(None);
        };

        debug!("Refreshing expired session");
        match self.refresh(refresh_token).await {
            Ok(refreshed) => {
                *self.session.write().await = Some(refreshed.clone());
                self.publish(SessionEvent::TokenRefreshed(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(e) => {
                warn!("Session refresh failed: {}", e);
                *self.session.write().await = None;
                self.publish(SessionEvent::SignedOut);
                Ok(None)
            }
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;

        info!(user = %session.user.id, "Signed in");
        *self.session.write().await = Some(session.clone());
        self.publish(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let previous = self.session.write().await.take();
        self.publish(SessionEvent::SignedOut);

        let Some(session) = previous else {
            return Ok(());
        };

        let url = self.config().auth_url("logout");
        let request = self
            .http_client()
            .request(Method::POST, &url)
            .header("apikey", &self.config().anon_key)
            .bearer_auth(&session.access_token);

        self.send_empty(request).await?;
        info!("Signed out");
        Ok(())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_with_expires_in() {
        let token: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "jwt",
                "refresh_token": "r1",
                "expires_in": 3600,
                "token_type": "bearer",
                "user": { "id": "u1", "email": "ana@fabrica.com", "role": "authenticated" }
            }"#,
        )
        .unwrap();

        let now = Utc::now();
        let session = token.into_session(now);
        assert_eq!(session.user.id, "u1");
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
        assert_eq!(session.expires_at, Some(now + ChronoDuration::seconds(3600)));
    }

    #[test]
    fn test_token_response_prefers_expires_at() {
        let token: TokenResponse = serde_json::from_str(
            r#"{ "access_token": "jwt", "expires_in": 10, "expires_at": 1714557600,
                 "user": { "id": "u1" } }"#,
        )
        .unwrap();

        let session = token.into_session(Utc::now());
        assert_eq!(session.expires_at.unwrap().timestamp(), 1_714_557_600);
        assert!(session.user.email.is_none());
    }
}
