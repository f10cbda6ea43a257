//! Chat attachment rules.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::MessageKind;

/// Largest accepted upload, in bytes (10 MiB).
pub const MAX_ATTACHMENT_SIZE: u64 = 10 * 1024 * 1024;

/// MIME types accepted as images.
pub const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

/// MIME types accepted as documents.
pub const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// Reasons an attachment is refused before upload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachmentError {
    #[error("Arquivo muito grande. O tamanho máximo é 10MB.")]
    TooLarge { size: u64 },

    #[error("Tipo de arquivo não suportado. Use: JPG, PNG, WEBP, PDF, DOC, DOCX, XLS ou XLSX.")]
    UnsupportedType { mime_type: String },
}

/// Message kind for an accepted MIME type.
pub fn classify(mime_type: &str) -> Option<MessageKind> {
    if IMAGE_TYPES.contains(&mime_type) {
        Some(MessageKind::Image)
    } else if DOCUMENT_TYPES.contains(&mime_type) {
        Some(MessageKind::Document)
    } else {
        None
    }
}

/// Check size and type, returning the message kind the file will be sent as.
pub fn validate(size: u64, mime_type: &str) -> Result<MessageKind, AttachmentError> {
    if size > MAX_ATTACHMENT_SIZE {
        return Err(AttachmentError::TooLarge { size });
    }
    classify(mime_type).ok_or_else(|| AttachmentError::UnsupportedType {
        mime_type: mime_type.to_string(),
    })
}

/// Unique object name for an upload, keeping the original extension.
pub fn storage_name(original: &str) -> String {
    let extension = original
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8);
    let stem = format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple());

    match extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("image/png"), Some(MessageKind::Image));
        assert_eq!(classify("application/pdf"), Some(MessageKind::Document));
        assert_eq!(classify("text/plain"), None);
    }

    #[test]
    fn test_validate_size() {
        assert!(validate(MAX_ATTACHMENT_SIZE, "image/jpeg").is_ok());
        assert_eq!(
            validate(MAX_ATTACHMENT_SIZE + 1, "image/jpeg"),
            Err(AttachmentError::TooLarge {
                size: MAX_ATTACHMENT_SIZE + 1
            })
        );
    }

    #[test]
    fn test_validate_type() {
        assert!(matches!(
            validate(10, "application/zip"),
            Err(AttachmentError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_storage_name_keeps_extension() {
        let name = storage_name("Relatório.PDF");
        assert!(name.ends_with(".pdf"));
        assert_ne!(storage_name("a.png"), storage_name("a.png"));
        assert!(!storage_name("noext").contains('.'));
    }
}
