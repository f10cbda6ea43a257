//! Server-Sent Events change feed for a single collection.
//!
//! Each event carries a database-webhook style payload:
//!
//! ```json
//! { "type": "UPDATE", "table": "tickets", "record": { ... }, "old_record": { ... } }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::Stream;
use futures::FutureExt;
use mecanica_core::{AuthProvider, BackendError, ChangeEvent, ChangeKind, Collection, Record};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde::Deserialize;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::client::SupabaseClient;
use crate::error::SupabaseError;

/// How a dropped change feed is re-established.
///
/// Delays grow geometrically from `initial_delay` up to `max_delay`. With
/// `max_attempts` unset the feed keeps trying for as long as it is held.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Wait before reconnecting after `failures` consecutive errors, or
    /// `None` once the attempt limit is reached.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| failures >= max) {
            return None;
        }
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = self.max_delay.as_millis() as f64;
        Some(Duration::from_millis(millis.min(capped) as u64))
    }
}

/// Wire payload of a change event.
#[derive(Debug, Deserialize)]
struct ChangePayload {
    #[serde(rename = "type")]
    kind: ChangeKind,
    table: String,
    #[serde(default)]
    record: Option<Record>,
    #[serde(default)]
    old_record: Option<Record>,
}

/// Decode one event's data into a change for `expected`.
///
/// Returns `Ok(None)` for events about other tables.
pub(crate) fn parse_change(
    expected: Collection,
    data: &str,
) -> Result<Option<ChangeEvent>, SupabaseError> {
    let payload: ChangePayload = serde_json::from_str(data)?;

    if Collection::from_table_name(&payload.table) != Some(expected) {
        return Ok(None);
    }

    Ok(Some(ChangeEvent {
        kind: payload.kind,
        collection: expected,
        record: payload.record.unwrap_or_default(),
        old_record: payload.old_record,
    }))
}

/// Token for a feed request: the live session's, refreshed if it expired,
/// or the anon key when signed out.
pub(crate) async fn feed_token(client: &SupabaseClient) -> String {
    match client.current_session().await {
        Ok(Some(session)) => session.access_token,
        Ok(None) => client.config().anon_key.clone(),
        Err(e) => {
            warn!("Session lookup for change feed failed: {}", e);
            client.config().anon_key.clone()
        }
    }
}

/// Open one connection. The event source never retries on its own; the
/// feed reconnects with a fresh token instead.
async fn open(client: SupabaseClient, collection: Collection) -> Result<EventSource, SupabaseError> {
    let url = client.config().realtime_events_url(collection);
    info!("Opening change feed {}", url);

    let token = feed_token(&client).await;
    // The feed is long-lived, so it gets a client without the request timeout.
    let sse_client = reqwest::Client::builder().build()?;
    let mut event_source = sse_client
        .get(&url)
        .header("apikey", &client.config().anon_key)
        .bearer_auth(token)
        .eventsource()
        .map_err(|e| SupabaseError::Sse(e.to_string()))?;
    event_source.set_retry_policy(Box::new(Never));
    Ok(event_source)
}

enum FeedState {
    Open(EventSource),
    Waiting(Pin<Box<Sleep>>),
    Connecting(BoxFuture<'static, Result<EventSource, SupabaseError>>),
    Closed,
}

/// A stream of row changes for one collection.
///
/// A dropped connection yields one error item and is re-opened after the
/// configured backoff. The stream ends once the attempt limit is reached.
pub struct ChangeFeed {
    client: SupabaseClient,
    collection: Collection,
    reconnect: ReconnectConfig,
    failures: u32,
    state: FeedState,
}

impl ChangeFeed {
    /// Open the change feed for a collection.
    pub async fn connect(
        client: &SupabaseClient,
        collection: Collection,
        reconnect: &ReconnectConfig,
    ) -> Result<Self, SupabaseError> {
        let event_source = open(client.clone(), collection).await?;
        Ok(Self {
            client: client.clone(),
            collection,
            reconnect: reconnect.clone(),
            failures: 0,
            state: FeedState::Open(event_source),
        })
    }

    /// Count a failure and schedule the next attempt, if any.
    fn fail(&mut self, e: impl std::fmt::Display) -> BackendError {
        self.failures = self.failures.saturating_add(1);
        error!(
            collection = %self.collection,
            failures = self.failures,
            "Change feed error: {}",
            e
        );
        self.state = match self.reconnect.next_delay(self.failures) {
            Some(delay) => {
                debug!(collection = %self.collection, ?delay, "Reconnecting change feed");
                FeedState::Waiting(Box::pin(tokio::time::sleep(delay)))
            }
            None => {
                warn!(collection = %self.collection, "Change feed gave up reconnecting");
                FeedState::Closed
            }
        };
        SupabaseError::Sse(e.to_string()).into()
    }
}

impl Stream for ChangeFeed {
    type Item = Result<ChangeEvent, BackendError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            match &mut this.state {
                FeedState::Open(event_source) => match Pin::new(&mut *event_source).poll_next(cx) {
                    Poll::Ready(Some(Ok(Event::Open))) => {
                        debug!(collection = %this.collection, "Change feed opened");
                        this.failures = 0;
                    }
                    Poll::Ready(Some(Ok(Event::Message(msg)))) => {
                        if msg.data.trim().is_empty() || msg.event == "ping" {
                            continue;
                        }
                        match parse_change(this.collection, &msg.data) {
                            Ok(Some(change)) => return Poll::Ready(Some(Ok(change))),
                            Ok(None) => continue,
                            Err(e) => {
                                warn!("Failed to parse change event: {}", e);
                                debug!("Raw data: {}", msg.data);
                            }
                        }
                    }
                    Poll::Ready(Some(Err(e))) => {
                        event_source.close();
                        let err = this.fail(e);
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        info!(collection = %this.collection, "Change feed ended");
                        this.state = FeedState::Closed;
                    }
                    Poll::Pending => return Poll::Pending,
                },
                FeedState::Waiting(sleep) => {
                    if sleep.as_mut().poll(cx).is_pending() {
                        return Poll::Pending;
                    }
                    this.state =
                        FeedState::Connecting(open(this.client.clone(), this.collection).boxed());
                }
                FeedState::Connecting(connecting) => match connecting.as_mut().poll(cx) {
                    Poll::Ready(Ok(event_source)) => this.state = FeedState::Open(event_source),
                    Poll::Ready(Err(e)) => {
                        let err = this.fail(e);
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                FeedState::Closed => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_grows_and_caps() {
        let config = ReconnectConfig::default();
        assert_eq!(config.next_delay(1), Some(Duration::from_millis(500)));
        assert_eq!(config.next_delay(4), Some(Duration::from_secs(4)));
        assert_eq!(config.next_delay(11), Some(Duration::from_secs(30)));
        assert_eq!(config.next_delay(u32::MAX), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_reconnect_attempt_limit() {
        let limited = ReconnectConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(limited.next_delay(2).is_some());
        assert_eq!(limited.next_delay(3), None);
        assert!(ReconnectConfig::default().next_delay(1000).is_some());
    }

    #[tokio::test]
    async fn test_feed_token_follows_session() {
        use chrono::{Duration as ChronoDuration, Utc};
        use mecanica_core::{Session, SessionUser};

        let config = crate::SupabaseConfig::new("https://xyz.supabase.co", "anon").unwrap();
        let client = SupabaseClient::new(config).unwrap();
        assert_eq!(feed_token(&client).await, "anon");

        let session = |token: &str| Session {
            access_token: token.to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
            user: SessionUser {
                id: "u1".into(),
                email: None,
            },
        };
        client.restore_session(session("jwt-1")).await;
        assert_eq!(feed_token(&client).await, "jwt-1");

        // A later session replaces the token used for the next connection.
        client.restore_session(session("jwt-2")).await;
        assert_eq!(feed_token(&client).await, "jwt-2");
    }

    #[test]
    fn test_parse_update() {
        let change = parse_change(
            Collection::Tickets,
            r#"{"type":"UPDATE","table":"tickets","record":{"id":"t1","status":"Atendimento"},
                "old_record":{"id":"t1","status":"Em Aberto"}}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.row_id().as_deref(), Some("t1"));
        assert!(change.old_record.is_some());
    }

    #[test]
    fn test_parse_delete_without_record() {
        let change = parse_change(
            Collection::Messages,
            r#"{"type":"DELETE","table":"messages","record":null,"old_record":{"id":"m9"}}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(change.kind, ChangeKind::Delete);
        assert!(change.record.is_empty());
        assert_eq!(change.row_id().as_deref(), Some("m9"));
    }

    #[test]
    fn test_parse_other_table_is_skipped() {
        let change = parse_change(
            Collection::Tickets,
            r#"{"type":"INSERT","table":"messages","record":{"id":"m1"}}"#,
        )
        .unwrap();
        assert!(change.is_none());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_change(Collection::Tickets, "not json").is_err());
    }
}
