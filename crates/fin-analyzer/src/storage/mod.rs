//! Transient storage for uploaded documents
//!
//! Each upload is written once by the submission API, read by the worker
//! that owns the job, and deleted once the job reaches a terminal state.

mod local;

pub use local::LocalDocumentStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::DocumentRef;

/// Document store errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("write failed: {0}")]
    Write(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("delete failed: {0}")]
    Delete(String),
    #[error("invalid document reference: {0}")]
    InvalidRef(String),
}

/// Trait for document storage
///
/// Implementations:
/// - `LocalDocumentStore`: working directory on the local filesystem
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist an upload for `job_id` and return its reference
    async fn store(
        &self,
        job_id: &Uuid,
        filename: &str,
        data: &[u8],
    ) -> Result<DocumentRef, StorageError>;

    /// Retrieve document bytes
    async fn read(&self, document: &DocumentRef) -> Result<Vec<u8>, StorageError>;

    /// Delete a document
    async fn delete(&self, document: &DocumentRef) -> Result<(), StorageError>;

    /// Check if a document exists
    async fn exists(&self, document: &DocumentRef) -> Result<bool, StorageError>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
