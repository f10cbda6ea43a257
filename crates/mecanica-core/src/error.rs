//! Error types shared by every backend implementation.

use thiserror::Error;

/// Errors reported by a backend collaborator.
///
/// The variants mirror the failure taxonomy the sync engine cares about:
/// transient transport/backend failures, authorization-filtered results,
/// lookup misses and cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The request never produced a usable response (network, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with an error status.
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Row-level authorization refused or silently filtered the target.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The requested row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// No authenticated session is available for the request.
    #[error("not authenticated")]
    Unauthenticated,

    /// The response body could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The operation was superseded and abandoned.
    #[error("request cancelled")]
    Cancelled,
}

impl BackendError {
    /// Returns true if the error represents a superseded operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackendError::Cancelled)
    }

    /// Returns true if authorization refused or filtered the request.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            BackendError::PermissionDenied(_) | BackendError::Rejected { status: 401 | 403, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_classification() {
        assert!(BackendError::PermissionDenied("rls".into()).is_permission_denied());
        assert!(BackendError::Rejected {
            status: 403,
            message: "forbidden".into()
        }
        .is_permission_denied());
        assert!(!BackendError::Rejected {
            status: 500,
            message: "boom".into()
        }
        .is_permission_denied());
        assert!(!BackendError::Cancelled.is_permission_denied());
    }

    #[test]
    fn test_cancelled() {
        assert!(BackendError::Cancelled.is_cancelled());
        assert!(!BackendError::Transport("reset".into()).is_cancelled());
    }
}
