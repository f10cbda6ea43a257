//! REST client for the hosted backend.

use std::sync::Arc;

use async_trait::async_trait;
use mecanica_core::{
    Backend, BackendError, ChangeStream, Collection, FilterOp, Query, Record, Session,
    SessionEvent,
};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::config::SupabaseConfig;
use crate::error::SupabaseError;
use crate::realtime::ChangeFeed;

/// Capacity of the session event channel.
const SESSION_EVENT_CAPACITY: usize = 16;

/// Client for the hosted backend's REST, auth, storage and change-feed APIs.
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    config: SupabaseConfig,
    pub(crate) session: Arc<RwLock<Option<Session>>>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
}

impl SupabaseClient {
    /// Create a client. No request is made until the first call.
    pub fn new(config: SupabaseConfig) -> Result<Self, SupabaseError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(SupabaseError::Http)?;
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        info!("Backend client configured for {}", config.url);

        Ok(Self {
            http,
            config,
            session: Arc::new(RwLock::new(None)),
            events,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    /// Get the underlying HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http
    }

    /// Bearer token for the next request: the session token, or the anon key.
    pub(crate) async fn bearer(&self) -> String {
        match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.config.anon_key.clone(),
        }
    }

    /// Build a request carrying the API key and bearer token.
    pub(crate) async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let bearer = self.bearer().await;
        self.http
            .request(method, url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
    }

    /// Send a request and decode a JSON response, mapping error statuses.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, SupabaseError> {
        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Send a request and discard the response body.
    pub(crate) async fn send_empty(&self, request: RequestBuilder) -> Result<(), SupabaseError> {
        check_status(request.send().await?).await?;
        Ok(())
    }

    async fn rows(
        &self,
        method: Method,
        collection: Collection,
        query: &Query,
        body: Option<Value>,
    ) -> Result<Vec<Record>, SupabaseError> {
        let url = self.config.rest_url(collection);
        debug!(%collection, %method, "REST call");

        let mut request = self
            .request(method, &url)
            .await
            .query(&query_params(query))
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(&body);
        }

        self.send_json(request).await
    }
}

async fn check_status(response: Response) -> Result<Response, SupabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SupabaseError::from_response(status.as_u16(), &body))
}

/// Translate a query into REST query-string parameters.
pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];

    for filter in &query.filters {
        let value = match &filter.value {
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        };
        let op = match filter.op {
            FilterOp::Eq if filter.value.is_null() => "is",
            op => op.as_str(),
        };
        params.push((filter.field.clone(), format!("{op}.{value}")));
    }

    if let Some(order) = &query.order {
        let direction = if order.descending { "desc" } else { "asc" };
        params.push(("order".to_string(), format!("{}.{}", order.field, direction)));
    }

    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }

    params
}

#[async_trait]
impl Backend for SupabaseClient {
    async fn fetch_collection(
        &self,
        collection: Collection,
        query: &Query,
    ) -> Result<Vec<Record>, BackendError> {
        Ok(self.rows(Method::GET, collection, query, None).await?)
    }

    async fn insert(&self, collection: Collection, record: Record) -> Result<Record, BackendError> {
        let rows = self
            .rows(
                Method::POST,
                collection,
                &Query::new(),
                Some(Value::Object(record)),
            )
            .await?;

        // Row-level security can accept the insert yet hide the stored row.
        rows.into_iter().next().ok_or_else(|| {
            BackendError::PermissionDenied(format!("inserted {collection} row is not visible"))
        })
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Record,
    ) -> Result<Record, BackendError> {
        let rows = self
            .rows(
                Method::PATCH,
                collection,
                &Query::by_id(id),
                Some(Value::Object(patch)),
            )
            .await?;

        rows.into_iter().next().ok_or_else(|| {
            BackendError::PermissionDenied(format!("no visible {collection} row {id} to update"))
        })
    }

    async fn update_where(
        &self,
        collection: Collection,
        query: &Query,
        patch: Record,
    ) -> Result<Vec<Record>, BackendError> {
        Ok(self
            .rows(Method::PATCH, collection, query, Some(Value::Object(patch)))
            .await?)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<u64, BackendError> {
        let rows = self
            .rows(Method::DELETE, collection, &Query::by_id(id), None)
            .await?;
        Ok(rows.len() as u64)
    }

    async fn subscribe(&self, collection: Collection) -> Result<ChangeStream, BackendError> {
        let feed = ChangeFeed::connect(self, collection, &self.config.reconnect).await?;
        Ok(Box::pin(feed))
    }

    fn name(&self) -> &str {
        "supabase"
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("url", &self.config.url)
            .finish()
    }
}
