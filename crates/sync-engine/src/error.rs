//! Error types for sync operations.

use mecanica_core::attachment::AttachmentError;
use mecanica_core::{BackendError, Collection, TicketStatus};
use thiserror::Error;

use crate::notify::NotificationKind;

/// Errors returned by session and store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The backend call failed.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// The backend accepted the request but no row was affected.
    #[error("no permission to change {collection} row {id}")]
    PermissionDenied { collection: Collection, id: String },

    /// The ticket cannot move between these states.
    #[error("ticket cannot go from '{from}' to '{to}'")]
    InvalidTransition { from: TicketStatus, to: TicketStatus },

    /// The operation needs an authenticated identity.
    #[error("not signed in")]
    NotAuthenticated,

    /// The target is not in the store.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The request was refused before reaching the backend.
    #[error("{0}")]
    Validation(String),

    /// The attachment was refused before upload.
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Whether this is an authorization-filtered result.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            SyncError::PermissionDenied { .. } => true,
            SyncError::Backend(e) => e.is_permission_denied(),
            _ => false,
        }
    }

    /// Whether the operation was superseded rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Backend(e) if e.is_cancelled())
    }

    /// Notification kind users see for this error.
    pub fn notification_kind(&self) -> NotificationKind {
        if self.is_permission_denied() {
            NotificationKind::Permission
        } else {
            NotificationKind::Error
        }
    }

    /// User-facing text for a failed operation described by `context`
    /// (e.g., "excluir chamado").
    pub fn user_message(&self, context: &str) -> String {
        match self {
            e if e.is_permission_denied() => format!(
                "Sem permissão para {context}. Verifique suas permissões de acesso."
            ),
            SyncError::InvalidTransition { from, to } => {
                format!("Não é possível {context}: status '{from}' não permite '{to}'.")
            }
            SyncError::NotAuthenticated => {
                format!("Não é possível {context}: sessão expirada, entre novamente.")
            }
            SyncError::Validation(msg) => msg.clone(),
            SyncError::Attachment(e) => e.to_string(),
            other => format!("Erro ao {context}: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_variants() {
        let zero_rows = SyncError::PermissionDenied {
            collection: Collection::Tickets,
            id: "t9".into(),
        };
        assert!(zero_rows.is_permission_denied());
        assert_eq!(zero_rows.notification_kind(), NotificationKind::Permission);

        let forbidden = SyncError::from(BackendError::Rejected {
            status: 403,
            message: "forbidden".into(),
        });
        assert!(forbidden.is_permission_denied());

        let transient = SyncError::from(BackendError::Transport("timeout".into()));
        assert!(!transient.is_permission_denied());
        assert_eq!(transient.notification_kind(), NotificationKind::Error);
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let denied = SyncError::PermissionDenied {
            collection: Collection::Tickets,
            id: "t9".into(),
        };
        let failed = SyncError::from(BackendError::Transport("timeout".into()));

        let denied_text = denied.user_message("excluir chamado");
        let failed_text = failed.user_message("excluir chamado");
        assert!(denied_text.starts_with("Sem permissão"));
        assert!(failed_text.starts_with("Erro ao excluir chamado"));
        assert_ne!(denied_text, failed_text);
    }

    #[test]
    fn test_cancelled() {
        assert!(SyncError::from(BackendError::Cancelled).is_cancelled());
        assert!(!SyncError::NotAuthenticated.is_cancelled());
    }
}
