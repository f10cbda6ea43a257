//! In-memory backend - tables, change broadcasting and fault injection.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::StreamExt;
use mecanica_core::{
    record_id, Backend, BackendError, ChangeEvent, ChangeStream, Collection, Query, Record,
};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

const CHANGE_CAPACITY: usize = 256;

#[derive(Default)]
struct State {
    tables: HashMap<Collection, Vec<Record>>,
    /// Reads of these collections fail with the stored error.
    fetch_failures: HashMap<Collection, BackendError>,
    /// Writes to these collections fail with the stored error.
    write_failures: HashMap<Collection, BackendError>,
    /// Rows that can be read but not modified, as row-level security would.
    protected: HashSet<(Collection, String)>,
    fetch_counts: HashMap<Collection, usize>,
}

/// A backend that keeps every collection in memory.
///
/// Successful writes are broadcast to subscribers as change events, so the
/// realtime path can be exercised end to end. Use [`push_event`] to simulate
/// changes made by other clients.
///
/// [`push_event`]: MemoryBackend::push_event
pub struct MemoryBackend {
    state: Mutex<State>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend that broadcasts its own writes.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            changes,
        }
    }

    /// Append rows to a collection without emitting change events.
    pub async fn seed(&self, collection: Collection, rows: impl IntoIterator<Item = Value>) {
        let mut state = self.state.lock().await;
        let table = state.tables.entry(collection).or_default();
        table.extend(rows.into_iter().map(crate::record));
    }

    /// Current rows of a collection.
    pub async fn rows(&self, collection: Collection) -> Vec<Record> {
        let state = self.state.lock().await;
        state.tables.get(&collection).cloned().unwrap_or_default()
    }

    /// Row with the given id, if present.
    pub async fn row(&self, collection: Collection, id: &str) -> Option<Record> {
        let state = self.state.lock().await;
        state
            .tables
            .get(&collection)?
            .iter()
            .find(|row| record_id(row).as_deref() == Some(id))
            .cloned()
    }

    /// Make reads of a collection fail until cleared.
    pub async fn fail_fetch(&self, collection: Collection, error: BackendError) {
        self.state.lock().await.fetch_failures.insert(collection, error);
    }

    /// Make writes to a collection fail until cleared.
    pub async fn fail_writes(&self, collection: Collection, error: BackendError) {
        self.state.lock().await.write_failures.insert(collection, error);
    }

    /// Remove any injected read or write failure for a collection.
    pub async fn clear_failures(&self, collection: Collection) {
        let mut state = self.state.lock().await;
        state.fetch_failures.remove(&collection);
        state.write_failures.remove(&collection);
    }

    /// Keep a row readable but make updates and deletes affect zero rows.
    pub async fn protect_row(&self, collection: Collection, id: impl Into<String>) {
        self.state
            .lock()
            .await
            .protected
            .insert((collection, id.into()));
    }

    /// Number of reads served (or failed) for a collection.
    pub async fn fetch_count(&self, collection: Collection) -> usize {
        let state = self.state.lock().await;
        state.fetch_counts.get(&collection).copied().unwrap_or(0)
    }

    /// Deliver a change event to subscribers without touching the tables.
    pub fn push_event(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }

    /// Number of live change subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    fn broadcast(&self, event: ChangeEvent) {
        debug!(collection = %event.collection, kind = ?event.kind, "Broadcasting change");
        let _ = self.changes.send(event);
    }
}

fn write_failure(state: &State, collection: Collection) -> Result<(), BackendError> {
    match state.write_failures.get(&collection) {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

fn is_writable(state: &State, collection: Collection, row: &Record) -> bool {
    match record_id(row) {
        Some(id) => !state.protected.contains(&(collection, id)),
        None => true,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_collection(
        &self,
        collection: Collection,
        query: &Query,
    ) -> Result<Vec<Record>, BackendError> {
        let mut state = self.state.lock().await;
        *state.fetch_counts.entry(collection).or_default() += 1;

        if let Some(err) = state.fetch_failures.get(&collection) {
            return Err(err.clone());
        }

        let rows = state.tables.get(&collection).map(Vec::as_slice).unwrap_or(&[]);
        Ok(query.apply(rows))
    }

    async fn insert(
        &self,
        collection: Collection,
        mut record: Record,
    ) -> Result<Record, BackendError> {
        let mut state = self.state.lock().await;
        write_failure(&state, collection)?;

        if record_id(&record).is_none() {
            record.insert(
                "id".to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }

        state.tables.entry(collection).or_default().push(record.clone());
        drop(state);

        self.broadcast(ChangeEvent::insert(collection, record.clone()));
        Ok(record)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Record,
    ) -> Result<Record, BackendError> {
        let mut state = self.state.lock().await;
        write_failure(&state, collection)?;

        if state.protected.contains(&(collection, id.to_string())) {
            return Err(BackendError::PermissionDenied(format!(
                "no visible {collection} row {id} to update"
            )));
        }

        let table = state.tables.entry(collection).or_default();
        let Some(row) = table
            .iter_mut()
            .find(|row| record_id(row).as_deref() == Some(id))
        else {
            return Err(BackendError::PermissionDenied(format!(
                "no visible {collection} row {id} to update"
            )));
        };

        let old = row.clone();
        row.extend(patch);
        let updated = row.clone();
        drop(state);

        self.broadcast(
            ChangeEvent {
                old_record: Some(old),
                ..ChangeEvent::update(collection, updated.clone())
            },
        );
        Ok(updated)
    }

    async fn update_where(
        &self,
        collection: Collection,
        query: &Query,
        patch: Record,
    ) -> Result<Vec<Record>, BackendError> {
        let mut state = self.state.lock().await;
        write_failure(&state, collection)?;

        let writable: Vec<bool> = state
            .tables
            .get(&collection)
            .map(|rows| {
                rows.iter()
                    .map(|row| query.matches(row) && is_writable(&state, collection, row))
                    .collect()
            })
            .unwrap_or_default();

        let mut updated = Vec::new();
        if let Some(rows) = state.tables.get_mut(&collection) {
            for (row, selected) in rows.iter_mut().zip(writable) {
                if selected {
                    row.extend(patch.clone());
                    updated.push(row.clone());
                }
            }
        }
        drop(state);

        for row in &updated {
            self.broadcast(ChangeEvent::update(collection, row.clone()));
        }
        Ok(updated)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<u64, BackendError> {
        let mut state = self.state.lock().await;
        write_failure(&state, collection)?;

        if state.protected.contains(&(collection, id.to_string())) {
            return Ok(0);
        }

        let table = state.tables.entry(collection).or_default();
        let Some(index) = table
            .iter()
            .position(|row| record_id(row).as_deref() == Some(id))
        else {
            return Ok(0);
        };

        let removed = table.remove(index);
        drop(state);

        self.broadcast(ChangeEvent::delete(collection, removed));
        Ok(1)
    }

    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, BackendError> {
        let stream = BroadcastStream::new(self.changes.subscribe()).filter_map(move |item| {
            let item = match item {
                Ok(event) if event.collection == collection => Some(Ok(event)),
                Ok(_) => None,
                Err(e) => Some(Err(BackendError::Transport(e.to_string()))),
            };
            async move { item }
        });
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "MemoryBackend"
    }
}
