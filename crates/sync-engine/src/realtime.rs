//! Realtime merge engine.
//!
//! One task per change channel (tickets, messages, activity logs) folds each
//! event into the store as soon as it arrives. Events are normalized exactly
//! like refresh rows. Merging never waits on anything except the bounded
//! actor lookup for log entries whose author is not in the roster.

use std::sync::Arc;

use futures::StreamExt;
use mecanica_core::{
    resolve_role, ActivityLogEntry, ChangeEvent, ChangeKind, ChangeStream, ChatMessage,
    Collection, Identity, Normalize, Query, Ticket, UNNAMED_USER,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::merge::Change;
use crate::store::{annotate_log, StoreChange, SyncStore};

/// Collections followed in realtime.
pub const CHANNELS: [Collection; 3] = [
    Collection::Tickets,
    Collection::Messages,
    Collection::ActivityLogs,
];

/// Turn an event into a typed change. `None` when it names no row.
fn to_change<T: Normalize>(event: &ChangeEvent) -> Option<Change<T>> {
    let id = event.row_id()?;
    if id.is_empty() {
        return None;
    }
    Some(match event.kind {
        ChangeKind::Insert => Change::Insert(T::normalize(&event.record)),
        ChangeKind::Update => Change::Update(T::normalize(&event.record)),
        ChangeKind::Delete => Change::Delete(id),
    })
}

/// Fill a log entry's actor from the roster, else from a bounded profile
/// lookup. Whatever the payload carried (or the system actor) is kept when
/// both miss.
async fn resolve_actor(store: &SyncStore, mut entry: ActivityLogEntry) -> ActivityLogEntry {
    let known = store.read(|s| annotate_log(&mut entry, &s.roster()));
    if known || entry.user_id.is_empty() {
        return entry;
    }

    let query = Query::by_id(entry.user_id.as_str());
    let lookup = store
        .backend()
        .fetch_collection(Collection::Profiles, &query);
    match tokio::time::timeout(store.config().lookup_timeout, lookup).await {
        Ok(Ok(rows)) => match rows.first() {
            Some(row) => {
                let mut user = Identity::normalize(row);
                store.read(|s| resolve_role(&mut user, &s.job_roles));
                if user.name != UNNAMED_USER {
                    entry.user_name = user.name;
                }
                entry.user_role = user.role;
            }
            None => debug!(user = %entry.user_id, "Log actor not found"),
        },
        Ok(Err(e)) => warn!(user = %entry.user_id, "Log actor lookup failed: {}", e),
        Err(_) => warn!(user = %entry.user_id, "Log actor lookup timed out"),
    }
    entry
}

/// Merge one change event into the store.
pub async fn handle_event(store: &SyncStore, event: ChangeEvent) {
    debug!(collection = %event.collection, kind = ?event.kind, "Change event");
    let change = match event.collection {
        Collection::Tickets => to_change::<Ticket>(&event).map(StoreChange::Ticket),
        Collection::Messages => to_change::<ChatMessage>(&event).map(StoreChange::Message),
        Collection::ActivityLogs => match to_change::<ActivityLogEntry>(&event) {
            Some(Change::Insert(entry)) => Some(StoreChange::ActivityLog(Change::Insert(
                resolve_actor(store, entry).await,
            ))),
            Some(Change::Update(entry)) => Some(StoreChange::ActivityLog(Change::Update(
                resolve_actor(store, entry).await,
            ))),
            other => other.map(StoreChange::ActivityLog),
        },
        other => {
            debug!(collection = %other, "Ignoring change for unfollowed collection");
            None
        }
    };

    match change {
        Some(change) => store.apply_change(change),
        None => warn!(collection = %event.collection, "Change event without row id"),
    }
}

async fn run_channel(store: Arc<SyncStore>, collection: Collection, mut stream: ChangeStream) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => handle_event(&store, event).await,
            Err(e) if e.is_cancelled() => break,
            Err(e) => warn!(collection = %collection, "Change feed error: {}", e),
        }
    }
    info!(collection = %collection, "Change channel closed");
}

/// Starts the per-channel subscription tasks.
pub struct RealtimeEngine;

impl RealtimeEngine {
    /// Subscribe to every channel and start merging.
    ///
    /// A channel whose subscription fails is logged and skipped; the others
    /// still run.
    pub async fn start(store: Arc<SyncStore>) -> RealtimeHandle {
        let mut tasks = Vec::with_capacity(CHANNELS.len());
        for collection in CHANNELS {
            match store.backend().subscribe(collection).await {
                Ok(stream) => {
                    info!(collection = %collection, "Subscribed");
                    tasks.push(tokio::spawn(run_channel(store.clone(), collection, stream)));
                }
                Err(e) => warn!(collection = %collection, "Subscription failed: {}", e),
            }
        }
        RealtimeHandle { tasks }
    }
}

/// Owns the subscription tasks. Dropping it unsubscribes every channel.
pub struct RealtimeHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeHandle {
    /// Number of channels still being followed.
    pub fn active_channels(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Abort every subscription task.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Abort every subscription task and wait until they are gone.
    pub async fn stop(mut self) {
        let tasks: Vec<_> = self.tasks.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Subscription task failed: {}", e);
                }
            }
        }
        debug!("Realtime stopped");
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::session::AuthState;
    use mecanica_core::record_id;
    use mock_backend::{record, MemoryBackend};
    use serde_json::json;
    use tokio::sync::watch;

    fn store_over(backend: Arc<MemoryBackend>) -> SyncStore {
        let (_tx, rx) = watch::channel(AuthState::Unauthenticated);
        SyncStore::new(backend, rx, SyncConfig::default())
    }

    #[test]
    fn test_to_change_uses_old_record_for_deletes() {
        let event = ChangeEvent::delete(Collection::Messages, record(json!({ "id": "m1" })));
        let change = to_change::<ChatMessage>(&event).unwrap();
        assert_eq!(change, Change::Delete("m1".into()));

        let nameless = ChangeEvent::insert(Collection::Messages, record(json!({ "text": "oi" })));
        assert!(to_change::<ChatMessage>(&nameless).is_none());
    }

    #[tokio::test]
    async fn test_log_actor_from_lookup() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed(Collection::Profiles, [json!({ "id": "u9", "name": "Carla", "role": "Supervisor" })])
            .await;
        // Empty roster: the actor has to be looked up.
        let store = store_over(backend);

        let event = ChangeEvent::insert(
            Collection::ActivityLogs,
            record(json!({ "id": "l1", "user_id": "u9", "action": "Pausou o chamado #t1",
                           "timestamp": "2024-05-01T10:00:00Z" })),
        );
        handle_event(&store, event).await;

        let logs = store.snapshot().activity_logs;
        assert_eq!(logs[0].user_name, "Carla");
        assert_eq!(logs[0].user_role, "Supervisor");
    }

    #[tokio::test]
    async fn test_log_actor_falls_back_to_payload_then_system() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .fail_fetch(
                Collection::Profiles,
                mecanica_core::BackendError::Transport("offline".into()),
            )
            .await;
        let store = store_over(backend);

        let with_name = ChangeEvent::insert(
            Collection::ActivityLogs,
            record(json!({ "id": "l1", "user_id": "u9", "user_name": "Carla",
                           "timestamp": "2024-05-01T10:00:00Z" })),
        );
        let without_name = ChangeEvent::insert(
            Collection::ActivityLogs,
            record(json!({ "id": "l2", "user_id": "u9", "timestamp": "2024-05-01T10:01:00Z" })),
        );
        handle_event(&store, with_name).await;
        handle_event(&store, without_name).await;

        let logs = store.snapshot().activity_logs;
        let names: Vec<(&str, &str)> = logs
            .iter()
            .map(|l| (l.id.as_str(), l.user_name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![("l2", mecanica_core::SYSTEM_ACTOR), ("l1", "Carla")]
        );
    }

    #[tokio::test]
    async fn test_engine_merges_backend_writes() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(store_over(backend.clone()));
        let handle = RealtimeEngine::start(store.clone()).await;
        assert_eq!(handle.active_channels(), 3);

        let mut rx = store.subscribe();
        let stored = mecanica_core::Backend::insert(
            backend.as_ref(),
            Collection::Messages,
            record(json!({ "id": "m1", "sender_id": "u2", "receiver_id": "u1", "text": "oi" })),
        )
        .await
        .unwrap();
        assert_eq!(record_id(&stored).as_deref(), Some("m1"));

        rx.wait_for(|s| !s.messages.is_empty()).await.unwrap();
        handle.stop().await;
        assert_eq!(backend.subscriber_count(), 0);
    }
}
