//! In-memory auth provider - accounts, sessions and a session event channel.

use std::collections::HashMap;

use async_trait::async_trait;
use mecanica_core::{AuthProvider, BackendError, Session, SessionEvent, SessionUser};
use tokio::sync::{broadcast, Mutex};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
struct Account {
    password: String,
    user: SessionUser,
}

/// An auth provider backed by a fixed set of accounts.
///
/// Tests drive session transitions either through the trait methods or by
/// calling [`emit`](MemoryAuth::emit) directly.
pub struct MemoryAuth {
    accounts: Mutex<HashMap<String, Account>>,
    session: Mutex<Option<Session>>,
    sign_out_failure: Mutex<Option<BackendError>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuth {
    /// Create a provider with no accounts and no session.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            accounts: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            sign_out_failure: Mutex::new(None),
            events,
        }
    }

    /// Register an account.
    pub async fn add_account(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
        user_id: impl Into<String>,
    ) {
        let email = email.into();
        let account = Account {
            password: password.into(),
            user: SessionUser {
                id: user_id.into(),
                email: Some(email.clone()),
            },
        };
        self.accounts.lock().await.insert(email, account);
    }

    /// Install a session as if restored from storage. No event is emitted.
    pub async fn restore(&self, session: Session) {
        *self.session.lock().await = Some(session);
    }

    /// Make the next remote sign-out fail with `error`.
    pub async fn fail_sign_out(&self, error: BackendError) {
        *self.sign_out_failure.lock().await = Some(error);
    }

    /// Publish a session event and apply it to the stored session.
    pub async fn emit(&self, event: SessionEvent) {
        *self.session.lock().await = event.session().cloned();
        let _ = self.events.send(event);
    }

    /// Build a session for a user id.
    pub fn session_for(user_id: impl Into<String>, email: Option<&str>) -> Session {
        Session {
            access_token: uuid::Uuid::new_v4().to_string(),
            refresh_token: Some(uuid::Uuid::new_v4().to_string()),
            expires_at: None,
            user: SessionUser {
                id: user_id.into(),
                email: email.map(str::to_string),
            },
        }
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        Ok(self.session.lock().await.clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let account = self.accounts.lock().await.get(email).cloned();
        let account = match account {
            Some(account) if account.password == password => account,
            _ => {
                return Err(BackendError::Rejected {
                    status: 400,
                    message: "Invalid login credentials".to_string(),
                })
            }
        };

        let session = Self::session_for(account.user.id, account.user.email.as_deref());
        self.emit(SessionEvent::SignedIn(session.clone())).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.emit(SessionEvent::SignedOut).await;
        match self.sign_out_failure.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let auth = MemoryAuth::new();
        auth.add_account("ana@fabrica.com", "segredo", "u1").await;
        let mut events = auth.session_events();

        let session = auth
            .sign_in_with_password("ana@fabrica.com", "segredo")
            .await
            .unwrap();
        assert_eq!(session.user.id, "u1");
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::SignedIn(_)));
        assert!(auth.current_session().await.unwrap().is_some());

        auth.sign_out().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedOut);
        assert!(auth.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let auth = MemoryAuth::new();
        auth.add_account("ana@fabrica.com", "segredo", "u1").await;
        let err = auth
            .sign_in_with_password("ana@fabrica.com", "errado")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_failed_sign_out_still_clears_session() {
        let auth = MemoryAuth::new();
        auth.restore(MemoryAuth::session_for("u1", None)).await;
        auth.fail_sign_out(BackendError::Transport("offline".into()))
            .await;

        assert!(auth.sign_out().await.is_err());
        assert!(auth.current_session().await.unwrap().is_none());
    }
}
