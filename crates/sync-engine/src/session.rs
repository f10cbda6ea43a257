//! Identity & session tracking.
//!
//! The tracker is the single owner of "who is signed in". It publishes an
//! [`AuthState`] on a watch channel and moves through
//! `Unauthenticated -> SessionPending -> Authenticated { enriched: false }
//! -> Authenticated { enriched: true }`.
//!
//! A placeholder identity is published as soon as a session is known, so
//! callers never wait on the profile round trip. Profile enrichment runs in a
//! background task that owns a [`CancellationToken`] and a generation number;
//! starting a new enrichment cancels the previous one, and a result whose
//! generation is no longer current is dropped even if it arrives late.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use mecanica_core::{
    AuthProvider, Backend, BackendError, Collection, Identity, JobRole, Normalize, Query, Session,
    SessionEvent, SessionUser, UNNAMED_USER,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Authentication state as seen by the rest of the client.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Unauthenticated,
    /// A session lookup or sign-in is in flight.
    SessionPending,
    /// Signed in. `enriched` is false while the identity is still the
    /// placeholder built from session claims.
    Authenticated { identity: Identity, enriched: bool },
}

impl AuthState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthState::Authenticated { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }

    pub fn is_enriched(&self) -> bool {
        matches!(self, AuthState::Authenticated { enriched: true, .. })
    }
}

/// Bookkeeping for the current enrichment.
struct Enrichment {
    generation: u64,
    token: CancellationToken,
    access_token: Option<String>,
}

struct Inner {
    auth: Arc<dyn AuthProvider>,
    backend: Arc<dyn Backend>,
    config: SyncConfig,
    state: watch::Sender<AuthState>,
    loading: watch::Sender<bool>,
    enrichment: Mutex<Enrichment>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    /// Publish the placeholder for `session` and spawn its enrichment.
    ///
    /// Returns `None` when an enrichment for the same access token is already
    /// current and `force` is not set.
    fn begin_enrichment(
        self: &Arc<Self>,
        session: Session,
        force: bool,
    ) -> Option<JoinHandle<()>> {
        let (generation, token) = {
            let mut current = lock(&self.enrichment);
            if !force
                && !current.token.is_cancelled()
                && current.access_token.as_deref() == Some(session.access_token.as_str())
            {
                debug!(user = %session.user.id, "Enrichment already current for session");
                return None;
            }
            current.token.cancel();
            current.generation += 1;
            current.token = CancellationToken::new();
            current.access_token = Some(session.access_token.clone());
            (current.generation, current.token.clone())
        };

        let user = session.user;
        self.state.send_modify(|state| {
            // A token refresh for the same user keeps what is already shown.
            let same_user = state.identity().is_some_and(|identity| identity.id == user.id);
            if !same_user {
                *state = AuthState::Authenticated {
                    identity: Identity::placeholder(user.id.clone(), user.email.as_deref()),
                    enriched: false,
                };
            }
        });
        self.loading.send_replace(false);

        let weak = Arc::downgrade(self);
        let backend = self.backend.clone();
        Some(tokio::spawn(async move {
            let placeholder = Identity::placeholder(user.id.clone(), user.email.as_deref());
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => Err(BackendError::Cancelled),
                outcome = fetch_profile(backend.as_ref(), &user) => outcome,
            };

            let Some(inner) = weak.upgrade() else {
                return;
            };
            match outcome {
                Ok(Some(mut identity)) => {
                    if identity.email.is_none() {
                        identity.email = user.email.clone();
                    }
                    if identity.name == UNNAMED_USER {
                        identity.name = placeholder.name;
                    }
                    inner.commit(generation, &token, identity);
                }
                Ok(None) => {
                    warn!(user = %user.id, "No profile row for signed-in user, keeping placeholder")
                }
                Err(e) if e.is_cancelled() => {
                    debug!(user = %user.id, generation, "Profile enrichment cancelled")
                }
                Err(e) => warn!(user = %user.id, "Profile enrichment failed: {}", e),
            }
        }))
    }

    /// Replace the identity if `generation` is still the current one.
    fn commit(&self, generation: u64, token: &CancellationToken, identity: Identity) {
        let current = lock(&self.enrichment);
        if current.generation != generation || token.is_cancelled() {
            debug!(generation, current = current.generation, "Discarding superseded profile");
            return;
        }
        info!(user = %identity.id, role = %identity.role, "Identity enriched");
        self.state.send_replace(AuthState::Authenticated {
            identity,
            enriched: true,
        });
    }

    /// Cancel enrichment and drop the identity.
    fn clear(&self) {
        {
            let mut current = lock(&self.enrichment);
            current.token.cancel();
            current.generation += 1;
            current.access_token = None;
        }
        self.state.send_replace(AuthState::Unauthenticated);
        self.loading.send_replace(false);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

/// Fetch the profile row for `user` and resolve its role name.
///
/// `Ok(None)` means the row is missing or filtered.
async fn fetch_profile(
    backend: &dyn Backend,
    user: &SessionUser,
) -> std::result::Result<Option<Identity>, BackendError> {
    let rows = backend
        .fetch_collection(Collection::Profiles, &Query::by_id(user.id.as_str()))
        .await?;
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    let mut identity = Identity::normalize(row);

    if let Some(job_role_id) = identity.job_role_id.clone() {
        match backend
            .fetch_collection(Collection::JobRoles, &Query::by_id(job_role_id.as_str()))
            .await
        {
            Ok(rows) => {
                let roles = JobRole::normalize_all(&rows);
                if roles.is_empty() {
                    warn!(user = %user.id, job_role = %job_role_id, "Job role not found");
                }
                mecanica_core::resolve_role(&mut identity, &roles);
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => warn!(user = %user.id, "Job role lookup failed: {}", e),
        }
    }

    Ok(Some(identity))
}

/// Tracks the authenticated identity.
///
/// Background tasks hold only a weak reference; dropping the tracker stops
/// them.
pub struct SessionTracker {
    inner: Arc<Inner>,
}

impl SessionTracker {
    pub fn new(auth: Arc<dyn AuthProvider>, backend: Arc<dyn Backend>, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        let (loading, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                auth,
                backend,
                config,
                state,
                loading,
                enrichment: Mutex::new(Enrichment {
                    generation: 0,
                    token: CancellationToken::new(),
                    access_token: None,
                }),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Resolve the current session and start following session changes.
    ///
    /// The fail-safe timer clears `loading` after
    /// [`SyncConfig::auth_failsafe`] whatever else is still running.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.track(spawn_listener(
            Arc::downgrade(inner),
            inner.auth.session_events(),
        ));
        inner.track(spawn_failsafe(Arc::downgrade(inner), inner.config.auth_failsafe));

        inner.state.send_replace(AuthState::SessionPending);
        match inner.auth.current_session().await {
            Ok(Some(session)) => {
                info!(user = %session.user.id, "Restored session");
                if let Some(handle) = inner.begin_enrichment(session, false) {
                    inner.track(handle);
                }
                Ok(())
            }
            Ok(None) => {
                debug!("No session");
                inner.state.send_replace(AuthState::Unauthenticated);
                inner.loading.send_replace(false);
                Ok(())
            }
            Err(e) => {
                error!("Session lookup failed: {}", e);
                inner.state.send_replace(AuthState::Unauthenticated);
                inner.loading.send_replace(false);
                Err(e.into())
            }
        }
    }

    /// Sign in with email and password.
    ///
    /// Returns the placeholder identity; the enriched one follows on the
    /// watch channel.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let inner = &self.inner;
        inner.state.send_replace(AuthState::SessionPending);

        let session = match inner.auth.sign_in_with_password(email, password).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Sign-in failed: {}", e);
                inner.state.send_replace(AuthState::Unauthenticated);
                inner.loading.send_replace(false);
                return Err(e.into());
            }
        };

        info!(user = %session.user.id, "Signed in");
        if let Some(handle) = inner.begin_enrichment(session, false) {
            inner.track(handle);
        }
        self.identity().ok_or(SyncError::NotAuthenticated)
    }

    /// Sign out. Local state is cleared before the remote call.
    pub async fn sign_out(&self) {
        self.inner.clear();
        info!("Signed out");
        if let Err(e) = self.inner.auth.sign_out().await {
            warn!("Remote sign-out failed: {}", e);
        }
    }

    /// Re-read the session and re-run enrichment, waiting for it to finish.
    pub async fn refresh_session(&self) -> Result<()> {
        match self.inner.auth.current_session().await? {
            Some(session) => {
                if let Some(handle) = self.inner.begin_enrichment(session, true) {
                    if let Err(e) = handle.await {
                        debug!("Enrichment task ended early: {}", e);
                    }
                }
            }
            None => self.inner.clear(),
        }
        Ok(())
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to the loading flag.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.inner.loading.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        *self.inner.loading.borrow()
    }

    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity().cloned()
    }

    /// Stop the listener, the timer and any running enrichment.
    pub fn shutdown(&self) {
        lock(&self.inner.enrichment).token.cancel();
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_listener(
    weak: Weak<Inner>,
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session listener lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(inner) = weak.upgrade() else {
                break;
            };
            match event {
                SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) => {
                    if let Some(handle) = inner.begin_enrichment(session, false) {
                        inner.track(handle);
                    }
                }
                SessionEvent::SignedOut => {
                    if inner.state.borrow().is_authenticated() {
                        inner.clear();
                    }
                }
            }
        }
        debug!("Session listener stopped");
    })
}

fn spawn_failsafe(weak: Weak<Inner>, after: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(inner) = weak.upgrade() {
            if *inner.loading.borrow() {
                warn!("Auth fail-safe fired, clearing loading");
                inner.loading.send_replace(false);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock_backend::{MemoryAuth, MemoryBackend};
    use serde_json::json;
    use std::time::Duration;

    async fn backend_with_profile() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed(
                Collection::Profiles,
                [json!({ "id": "u1", "full_name": "Ana Souza", "job_role_id": "r1" })],
            )
            .await;
        backend
            .seed(
                Collection::JobRoles,
                [json!({ "id": "r1", "name": "Administrador do Sistema" })],
            )
            .await;
        backend
    }

    async fn wait_enriched(rx: &mut watch::Receiver<AuthState>) -> Identity {
        let state = rx.wait_for(AuthState::is_enriched).await.unwrap();
        state.identity().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_start_without_session() {
        let auth = Arc::new(MemoryAuth::new());
        let tracker = SessionTracker::new(auth, Arc::new(MemoryBackend::new()), SyncConfig::default());

        tracker.start().await.unwrap();
        assert_eq!(tracker.state(), AuthState::Unauthenticated);
        assert!(!tracker.is_loading());
    }

    #[tokio::test]
    async fn test_start_publishes_placeholder_then_enriches() {
        let auth = Arc::new(MemoryAuth::new());
        auth.restore(MemoryAuth::session_for("u1", Some("ana@fabrica.com")))
            .await;
        let tracker =
            SessionTracker::new(auth, backend_with_profile().await, SyncConfig::default());
        let mut rx = tracker.subscribe();

        tracker.start().await.unwrap();
        let placeholder = tracker.identity().unwrap();
        assert_eq!(placeholder.id, "u1");
        assert!(!tracker.is_loading());

        let identity = wait_enriched(&mut rx).await;
        assert_eq!(identity.name, "Ana Souza");
        assert_eq!(identity.role, "Administrador do Sistema");
        assert_eq!(identity.email.as_deref(), Some("ana@fabrica.com"));
    }

    #[tokio::test]
    async fn test_missing_profile_keeps_placeholder() {
        let auth = Arc::new(MemoryAuth::new());
        auth.restore(MemoryAuth::session_for("u404", Some("joao@fabrica.com")))
            .await;
        let backend = Arc::new(MemoryBackend::new());
        let tracker = SessionTracker::new(auth, backend.clone(), SyncConfig::default());

        tracker.start().await.unwrap();
        tracker.refresh_session().await.unwrap();

        let state = tracker.state();
        assert!(!state.is_enriched());
        assert_eq!(state.identity().unwrap().name, "joao");
    }

    #[tokio::test]
    async fn test_sign_in_and_sign_out() {
        let auth = Arc::new(MemoryAuth::new());
        auth.add_account("ana@fabrica.com", "segredo", "u1").await;
        let tracker =
            SessionTracker::new(auth.clone(), backend_with_profile().await, SyncConfig::default());
        tracker.start().await.unwrap();

        let err = tracker.sign_in("ana@fabrica.com", "errada").await.unwrap_err();
        assert!(matches!(err, SyncError::Backend(BackendError::Rejected { .. })));
        assert_eq!(tracker.state(), AuthState::Unauthenticated);

        let mut rx = tracker.subscribe();
        let placeholder = tracker.sign_in("ana@fabrica.com", "segredo").await.unwrap();
        assert_eq!(placeholder.name, "ana");
        assert_eq!(wait_enriched(&mut rx).await.name, "Ana Souza");

        auth.fail_sign_out(BackendError::Transport("offline".into()))
            .await;
        tracker.sign_out().await;
        assert_eq!(tracker.state(), AuthState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failsafe_clears_loading() {
        struct StuckAuth(MemoryAuth);

        #[async_trait::async_trait]
        impl AuthProvider for StuckAuth {
            async fn current_session(&self) -> std::result::Result<Option<Session>, BackendError> {
                std::future::pending().await
            }
            async fn sign_in_with_password(
                &self,
                email: &str,
                password: &str,
            ) -> std::result::Result<Session, BackendError> {
                self.0.sign_in_with_password(email, password).await
            }
            async fn sign_out(&self) -> std::result::Result<(), BackendError> {
                self.0.sign_out().await
            }
            fn session_events(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
                self.0.session_events()
            }
        }

        let tracker = Arc::new(SessionTracker::new(
            Arc::new(StuckAuth(MemoryAuth::new())),
            Arc::new(MemoryBackend::new()),
            SyncConfig::default(),
        ));
        let starter = tracker.clone();
        tokio::spawn(async move {
            let _ = starter.start().await;
        });

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(tracker.is_loading());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!tracker.is_loading());
        assert_eq!(tracker.state(), AuthState::SessionPending);
    }
}
