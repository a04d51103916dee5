// Uploaded source documents: store bytes, record metadata, and link them to
// the expense line items they were extracted from.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

// ============================================================================
// DOCUMENT RECORD
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub file_url: String,
    pub file_type: String,
    /// SHA-256 of the stored bytes, for duplicate detection.
    pub content_hash: String,
    /// Set once the document is linked to an expense line item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expense_id: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

// ============================================================================
// STORAGE
// ============================================================================

/// Store bytes, return a retrievable URL. Failures propagate - unlike OCR
/// there is no placeholder fallback for storage.
pub trait DocumentStorage {
    fn store(&self, bytes: &[u8], file_name: &str) -> AppResult<String>;
}

/// Local filesystem storage under an uploads directory. Stored names are
/// uuid-prefixed so two uploads of "receipt.png" never collide.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DocumentStorage for LocalStorage {
    fn store(&self, bytes: &[u8], file_name: &str) -> AppResult<String> {
        fs::create_dir_all(&self.root)
            .map_err(|e| AppError::Upstream(format!("create uploads dir: {}", e)))?;

        let stored_name = format!("{}-{}", uuid::Uuid::new_v4(), file_name);
        let path = self.root.join(&stored_name);
        fs::write(&path, bytes)
            .map_err(|e| AppError::Upstream(format!("write {}: {}", path.display(), e)))?;

        Ok(format!("/uploads/{}", stored_name))
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Store the bytes and record the document. Unlinked until a submission
/// claims it.
pub fn save_document(
    conn: &Connection,
    storage: &dyn DocumentStorage,
    bytes: &[u8],
    file_name: &str,
    file_type: &str,
) -> AppResult<Document> {
    if bytes.is_empty() {
        return Err(AppError::validation("No files provided"));
    }

    let file_url = storage.store(bytes, file_name)?;

    let document = Document {
        id: uuid::Uuid::new_v4().to_string(),
        file_name: file_name.to_string(),
        file_url,
        file_type: file_type.to_string(),
        content_hash: content_hash(bytes),
        expense_id: None,
        uploaded_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO documents (id, file_name, file_url, file_type, content_hash, expense_id, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
        params![
            document.id,
            document.file_name,
            document.file_url,
            document.file_type,
            document.content_hash,
            document.uploaded_at.to_rfc3339()
        ],
    )?;

    Ok(document)
}

/// Associate previously uploaded, unlinked documents with an expense line
/// item. Best-effort: unknown or already-linked ids are silently skipped.
/// Returns the number actually linked.
pub fn link_documents(
    conn: &Connection,
    expense_id: &str,
    document_ids: &[String],
) -> AppResult<usize> {
    let mut linked = 0;
    for document_id in document_ids {
        linked += conn.execute(
            "UPDATE documents SET expense_id = ?1 WHERE id = ?2 AND expense_id IS NULL",
            params![expense_id, document_id],
        )?;
    }
    Ok(linked)
}

pub fn get_document(conn: &Connection, id: &str) -> AppResult<Document> {
    conn.query_row(
        "SELECT id, file_name, file_url, file_type, content_hash, expense_id, uploaded_at
         FROM documents WHERE id = ?1",
        params![id],
        |row| {
            let uploaded_at: String = row.get(6)?;
            Ok(Document {
                id: row.get(0)?,
                file_name: row.get(1)?,
                file_url: row.get(2)?,
                file_type: row.get(3)?,
                content_hash: row.get(4)?,
                expense_id: row.get(5)?,
                uploaded_at: DateTime::parse_from_rfc3339(&uploaded_at)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("document", id))
}

// ============================================================================
// TESTS
// ============================================================================
