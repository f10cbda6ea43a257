//! Delayed backend - wraps another backend with artificial latency.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mecanica_core::{Backend, BackendError, ChangeStream, Collection, Query, Record};
use tokio::time::sleep;

/// A backend that wraps another backend and delays each call.
///
/// Reads can be given a per-collection delay, which is how tests arrange for
/// one collection to finish after another or after a competing write. A
/// fetch delay is spent before the read; a response delay after it, so the
/// caller receives rows that may already be stale.
pub struct DelayedBackend<B: Backend> {
    inner: B,
    delay: Duration,
    fetch_delays: HashMap<Collection, Duration>,
    response_delays: HashMap<Collection, Duration>,
}

impl<B: Backend> DelayedBackend<B> {
    /// Wrap `inner`, delaying every call by `delay`.
    pub fn new(inner: B, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            fetch_delays: HashMap::new(),
            response_delays: HashMap::new(),
        }
    }

    /// Wrap `inner` with a delay in milliseconds.
    pub fn with_millis(inner: B, millis: u64) -> Self {
        Self::new(inner, Duration::from_millis(millis))
    }

    /// Override the read delay of one collection.
    pub fn with_fetch_delay(mut self, collection: Collection, delay: Duration) -> Self {
        self.fetch_delays.insert(collection, delay);
        self
    }

    /// Read a collection immediately but hold the rows back for `delay`.
    pub fn with_response_delay(mut self, collection: Collection, delay: Duration) -> Self {
        self.response_delays.insert(collection, delay);
        self
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: Backend> Backend for DelayedBackend<B> {
    async fn fetch_collection(
        &self,
        collection: Collection,
        query: &Query,
    ) -> Result<Vec<Record>, BackendError> {
        let delay = self.fetch_delays.get(&collection).copied().unwrap_or(self.delay);
        sleep(delay).await;
        let rows = self.inner.fetch_collection(collection, query).await;
        if let Some(hold) = self.response_delays.get(&collection) {
            sleep(*hold).await;
        }
        rows
    }

    async fn insert(&self, collection: Collection, record: Record) -> Result<Record, BackendError> {
        sleep(self.delay).await;
        self.inner.insert(collection, record).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Record,
    ) -> Result<Record, BackendError> {
        sleep(self.delay).await;
        self.inner.update(collection, id, patch).await
    }

    async fn update_where(
        &self,
        collection: Collection,
        query: &Query,
        patch: Record,
    ) -> Result<Vec<Record>, BackendError> {
        sleep(self.delay).await;
        self.inner.update_where(collection, query, patch).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<u64, BackendError> {
        sleep(self.delay).await;
        self.inner.delete(collection, id).await
    }

    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, BackendError> {
        self.inner.subscribe(collection).await
    }

    fn name(&self) -> &str {
        "DelayedBackend"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_per_collection_fetch_delay() {
        let backend = DelayedBackend::with_millis(MemoryBackend::new(), 10)
            .with_fetch_delay(Collection::Tickets, Duration::from_millis(500));

        let start = Instant::now();
        backend
            .fetch_collection(Collection::Tickets, &Query::new())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));

        let start = Instant::now();
        backend
            .fetch_collection(Collection::Profiles, &Query::new())
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_delay_returns_rows_read_earlier() {
        let backend = Arc::new(
            DelayedBackend::with_millis(MemoryBackend::new(), 0)
                .with_response_delay(Collection::Tickets, Duration::from_millis(300)),
        );
        backend
            .inner()
            .seed(Collection::Tickets, [json!({ "id": "t1", "status": "Em Aberto" })])
            .await;

        let reader = backend.clone();
        let read = tokio::spawn(async move {
            reader.fetch_collection(Collection::Tickets, &Query::new()).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend
            .update(Collection::Tickets, "t1", crate::record(json!({ "status": "Atendimento" })))
            .await
            .unwrap();

        let rows = read.await.unwrap().unwrap();
        assert_eq!(rows[0]["status"], json!("Em Aberto"));
    }

    #[tokio::test]
    async fn test_backend_name() {
        let backend = DelayedBackend::with_millis(MemoryBackend::new(), 0);
        assert_eq!(backend.name(), "DelayedBackend");
    }
}
