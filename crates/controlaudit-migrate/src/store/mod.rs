//! Document store access.
//!
//! Every stage receives one [`DocumentStore`] handle built at startup and
//! never reaches for a global client. Paths are slash-separated and relative
//! to the database root, e.g. `apps/auditoria/users/{uid}/empresas/{id}`.

pub mod auth;
pub mod common;
pub mod firestore;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::MigrationConfig;
use crate::document::{Document, Fields};
use crate::error::{Error, Result};

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

/// Trait for document databases the pipeline can read from and write to.
///
/// Implement this trait to run the pipeline against another backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store type name, for logs.
    fn store_type(&self) -> &'static str;

    /// Reads one document. Returns `None` when it does not exist.
    async fn get_document(&self, path: &str) -> Result<Option<Fields>>;

    /// Lists the ids of the sub-collections directly under a document.
    async fn list_collection_ids(&self, document_path: &str) -> Result<Vec<String>>;

    /// Lists every document of a collection.
    async fn list_documents(&self, collection_path: &str) -> Result<Vec<Document>>;

    /// Creates or fully replaces a document.
    async fn set_document(&self, path: &str, fields: &Fields) -> Result<()>;

    /// Creates a document only if absent. Returns `false` when it already existed.
    async fn create_document(&self, path: &str, fields: &Fields) -> Result<bool>;

    /// Merges top-level fields into a document, creating it if needed.
    async fn merge_document(&self, path: &str, fields: &Fields) -> Result<()>;
}

/// Wrapper that forwards reads and rejects every write.
pub struct ReadOnlyStore {
    inner: Arc<dyn DocumentStore>,
}

impl ReadOnlyStore {
    /// Wraps a store handle.
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self { inner }
    }

    /// Wraps a store handle and returns it as a trait object.
    pub fn shared(inner: Arc<dyn DocumentStore>) -> Arc<dyn DocumentStore> {
        Arc::new(Self::new(inner))
    }
}

#[async_trait]
impl DocumentStore for ReadOnlyStore {
    fn store_type(&self) -> &'static str {
        self.inner.store_type()
    }

    async fn get_document(&self, path: &str) -> Result<Option<Fields>> {
        self.inner.get_document(path).await
    }

    async fn list_collection_ids(&self, document_path: &str) -> Result<Vec<String>> {
        self.inner.list_collection_ids(document_path).await
    }

    async fn list_documents(&self, collection_path: &str) -> Result<Vec<Document>> {
        self.inner.list_documents(collection_path).await
    }

    async fn set_document(&self, path: &str, _fields: &Fields) -> Result<()> {
        Err(Error::ReadOnly(path.to_string()))
    }

    async fn create_document(&self, path: &str, _fields: &Fields) -> Result<bool> {
        Err(Error::ReadOnly(path.to_string()))
    }

    async fn merge_document(&self, path: &str, _fields: &Fields) -> Result<()> {
        Err(Error::ReadOnly(path.to_string()))
    }
}

/// Builds the store handle described by the configuration.
///
/// # Errors
///
/// Returns a configuration error when credentials are missing or unreadable.
pub fn create_store(config: &MigrationConfig) -> Result<Arc<dyn DocumentStore>> {
    let store = FirestoreStore::from_config(&config.database, &config.options)?;
    Ok(Arc::new(store))
}

/// Joins a parent path and a child segment.
#[must_use]
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

/// Returns true when `path` equals `root` or lies underneath it.
#[must_use]
pub fn is_within(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    path == root || path.starts_with(&format!("{root}/"))
}

/// Validates a single path segment (document or collection id).
pub fn validate_segment(segment: &str, what: &str) -> Result<()> {
    if segment.trim().is_empty() {
        return Err(Error::Config(format!("{what} cannot be empty")));
    }
    if segment.contains('/') || segment == "." || segment == ".." {
        return Err(Error::Config(format!(
            "{what} '{segment}' is not a valid path segment"
        )));
    }
    if segment.len() > 4 && segment.starts_with("__") && segment.ends_with("__") {
        return Err(Error::Config(format!(
            "{what} '{segment}' uses a reserved __name__ form"
        )));
    }
    Ok(())
}

/// Validates a slash-separated collection path (odd number of segments).
pub fn validate_collection_path(path: &str, what: &str) -> Result<()> {
    let segments: Vec<&str> = path.split('/').collect();
    for segment in &segments {
        validate_segment(segment, what)?;
    }
    if segments.len() % 2 == 0 {
        return Err(Error::Config(format!(
            "{what} '{path}' must point at a collection (odd number of segments)"
        )));
    }
    Ok(())
}
