//! Error types for supabase-backend.

use mecanica_core::BackendError;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Postgres error code for a row-level security violation.
const RLS_VIOLATION: &str = "42501";

/// Errors that can occur when talking to the hosted backend.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the backend.
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Change-feed stream error.
    #[error("SSE error: {0}")]
    Sse(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Error body shapes returned by the REST, auth and storage services.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
    code: Option<serde_json::Value>,
}

impl SupabaseError {
    /// Build an API error from a status and a raw response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let code = parsed.code.map(|c| match c {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        let message = parsed
            .message
            .or(parsed.msg)
            .or(parsed.error_description)
            .or(parsed.error)
            .unwrap_or_else(|| body.trim().to_string());

        SupabaseError::Api {
            status,
            code,
            message,
        }
    }
}

impl From<SupabaseError> for BackendError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Http(e) => BackendError::Transport(e.to_string()),
            SupabaseError::Json(e) => BackendError::InvalidResponse(e.to_string()),
            SupabaseError::Api { code, message, .. } if code.as_deref() == Some(RLS_VIOLATION) => {
                BackendError::PermissionDenied(message)
            }
            SupabaseError::Api { status: 401, .. } => BackendError::Unauthenticated,
            SupabaseError::Api {
                status: 403,
                message,
                ..
            } => BackendError::PermissionDenied(message),
            SupabaseError::Api {
                status: 404,
                message,
                ..
            } => BackendError::NotFound {
                entity: "resource".to_string(),
                id: message,
            },
            SupabaseError::Api {
                status, message, ..
            } => BackendError::Rejected { status, message },
            SupabaseError::Sse(msg) => BackendError::Transport(msg),
            SupabaseError::Config(e) => BackendError::InvalidResponse(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgrest_error_body() {
        let err = SupabaseError::from_response(
            400,
            r#"{"code":"PGRST204","message":"Could not find the 'x' column","details":null}"#,
        );
        match err {
            SupabaseError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code.as_deref(), Some("PGRST204"));
                assert!(message.contains("'x' column"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_auth_error_body() {
        let err = SupabaseError::from_response(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert!(err.to_string().contains("Invalid login credentials"));
    }

    #[test]
    fn test_plain_text_body() {
        let err = SupabaseError::from_response(502, "Bad Gateway\n");
        assert!(err.to_string().ends_with("Bad Gateway"));
    }

    #[test]
    fn test_rls_violation_is_permission_denied() {
        let err = SupabaseError::from_response(
            403,
            r#"{"code":"42501","message":"new row violates row-level security policy"}"#,
        );
        assert!(BackendError::from(err).is_permission_denied());

        let err = SupabaseError::from_response(
            400,
            r#"{"code":"42501","message":"permission denied for table tickets"}"#,
        );
        assert!(BackendError::from(err).is_permission_denied());
    }

    #[test]
    fn test_status_mapping() {
        let unauth = BackendError::from(SupabaseError::from_response(401, "{}"));
        assert_eq!(unauth, BackendError::Unauthenticated);

        let missing = BackendError::from(SupabaseError::from_response(404, "{}"));
        assert!(matches!(missing, BackendError::NotFound { .. }));

        let rejected = BackendError::from(SupabaseError::from_response(500, "{}"));
        assert!(matches!(rejected, BackendError::Rejected { status: 500, .. }));
    }
}
