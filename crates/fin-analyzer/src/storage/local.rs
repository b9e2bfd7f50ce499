//! Filesystem-backed document store

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::types::DocumentRef;

use super::{DocumentStore, StorageError};

/// Stores uploads as `financial_document_{id}.pdf` under a working directory
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    /// Create a store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name used for a job's upload
    pub fn file_name_for(job_id: &Uuid) -> String {
        format!("financial_document_{}.pdf", job_id)
    }

    /// Resolve a reference to a path, refusing anything but a bare file name
    fn resolve(&self, document: &DocumentRef) -> Result<PathBuf, StorageError> {
        let key = document.as_str();
        let is_bare = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains('/')
            && !key.contains('\\');
        if !is_bare {
            return Err(StorageError::InvalidRef(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn store(
        &self,
        job_id: &Uuid,
        filename: &str,
        data: &[u8],
    ) -> Result<DocumentRef, StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {}", self.root.display(), e)))?;

        let document = DocumentRef::new(Self::file_name_for(job_id));
        let path = self.resolve(&document)?;

        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(
            "Stored upload '{}' for job {} at {} ({} bytes)",
            filename,
            job_id,
            path.display(),
            data.len()
        );

        Ok(document)
    }

    async fn read(&self, document: &DocumentRef) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(document)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(document.to_string()),
            _ => StorageError::Read(format!("{}: {}", path.display(), e)),
        })
    }

    async fn delete(&self, document: &DocumentRef) -> Result<(), StorageError> {
        let path = self.resolve(document)?;
        tokio::fs::remove_file(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(document.to_string()),
            _ => StorageError::Delete(format!("{}: {}", path.display(), e)),
        })
    }

    async fn exists(&self, document: &DocumentRef) -> Result<bool, StorageError> {
        let path = self.resolve(document)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::Read(format!("{}: {}", path.display(), e)))
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_read_delete_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path().join("data"));
        let job_id = Uuid::new_v4();

        let document = store.store(&job_id, "q3.pdf", b"%PDF-1.4 quarterly").await.unwrap();
        assert_eq!(document.as_str(), format!("financial_document_{}.pdf", job_id));
        assert!(store.exists(&document).await.unwrap());
        assert_eq!(store.read(&document).await.unwrap(), b"%PDF-1.4 quarterly");

        store.delete(&document).await.unwrap();
        assert!(!store.exists(&document).await.unwrap());
        assert!(matches!(
            store.delete(&document).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.read(&document).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_distinct_jobs_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path());

        let a = store.store(&Uuid::new_v4(), "a.pdf", b"a").await.unwrap();
        let b = store.store(&Uuid::new_v4(), "a.pdf", b"b").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.read(&a).await.unwrap(), b"a");
        assert_eq!(store.read(&b).await.unwrap(), b"b");
    }

    #[test]
    fn test_rejects_path_traversal() {
        let store = LocalDocumentStore::new("data");
        for key in ["../etc/passwd", "a/b.pdf", "..", "", "dir\\file"] {
            let result = tokio_test::block_on(store.read(&DocumentRef::new(key)));
            assert!(matches!(result, Err(StorageError::InvalidRef(_))), "{key}");
        }
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the directory should be
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let store = LocalDocumentStore::new(&blocker);
        let result = store.store(&Uuid::new_v4(), "x.pdf", b"x").await;
        assert!(matches!(result, Err(StorageError::Write(_))));
    }
}
