//! In-memory document store.
//!
//! Used by the test suites and for offline rehearsals of a migration. Paths
//! behave like Firestore paths: documents live at even-length paths and
//! their sub-collections are discovered from the stored keys.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::document::{Document, Fields};
use crate::error::{Error, Result};
use crate::store::DocumentStore;

/// In-memory [`DocumentStore`].
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Fields>>,
    failing: Mutex<HashSet<String>>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document without counting it as a write.
    pub fn insert(&self, path: &str, fields: Fields) {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), fields);
    }

    /// Removes a document, returning its fields.
    pub fn remove(&self, path: &str) -> Option<Fields> {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
    }

    /// Returns a copy of a document's fields.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Fields> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Copy of every stored document, keyed by path.
    #[must_use]
    pub fn dump(&self) -> BTreeMap<String, Fields> {
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Paths of every stored document under `prefix`.
    #[must_use]
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Makes every future write to `path` fail.
    pub fn fail_writes_to(&self, path: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string());
    }

    /// Number of writes accepted since creation.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self, path: &str) -> Result<()> {
        let failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(path) {
            return Err(Error::Api {
                status: 403,
                message: format!("PERMISSION_DENIED: write to {path} refused"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn get_document(&self, path: &str) -> Result<Option<Fields>> {
        Ok(self.get(path))
    }

    async fn list_collection_ids(&self, document_path: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", document_path.trim_end_matches('/'));
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let ids: BTreeSet<String> = docs
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split_once('/').map(|(collection, _)| collection))
            .map(String::from)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn list_documents(&self, collection_path: &str) -> Result<Vec<Document>> {
        let prefix = format!("{}/", collection_path.trim_end_matches('/'));
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(docs
            .iter()
            .filter_map(|(key, fields)| {
                let id = key.strip_prefix(&prefix)?;
                (!id.contains('/')).then(|| Document::new(id, fields.clone()))
            })
            .collect())
    }

    async fn set_document(&self, path: &str, fields: &Fields) -> Result<()> {
        self.check_writable(path)?;
        self.insert(path, fields.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_document(&self, path: &str, fields: &Fields) -> Result<bool> {
        self.check_writable(path)?;
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        if docs.contains_key(path) {
            return Ok(false);
        }
        docs.insert(path.to_string(), fields.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn merge_document(&self, path: &str, fields: &Fields) -> Result<()> {
        self.check_writable(path)?;
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        docs.entry(path.to_string())
            .or_default()
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FieldValue;

    fn named(name: &str) -> Fields {
        Fields::from([("nombre".to_string(), FieldValue::String(name.to_string()))])
    }

    #[tokio::test]
    async fn test_list_collection_ids_and_documents() {
        let store = MemoryStore::new();
        store.insert("users/u1", named("Ana"));
        store.insert("users/u1/empresas/e1", named("ACME"));
        store.insert("users/u1/empresas/e2", named("Globex"));
        store.insert("users/u1/empresas/e1/notas/n1", named("nested"));
        store.insert("users/u1/sucursales/s1", named("Centro"));
        store.insert("users/u10/empresas/x", named("other user"));

        let ids = store.list_collection_ids("users/u1").await.unwrap();
        assert_eq!(ids, vec!["empresas".to_string(), "sucursales".to_string()]);

        let docs = store.list_documents("users/u1/empresas").await.unwrap();
        let doc_ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(doc_ids, vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn test_create_document_only_when_absent() {
        let store = MemoryStore::new();
        assert!(store.create_document("owners/o1", &named("first")).await.unwrap());
        assert!(!store.create_document("owners/o1", &named("second")).await.unwrap());
        assert_eq!(store.get("owners/o1"), Some(named("first")));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_keeps_other_fields() {
        let store = MemoryStore::new();
        store.insert("owners/o1", named("Ana"));
        let patch = Fields::from([("status".to_string(), FieldValue::String("active".to_string()))]);
        store.merge_document("owners/o1", &patch).await.unwrap();

        let fields = store.get("owners/o1").unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields.contains_key("nombre"));
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryStore::new();
        store.fail_writes_to("owners/o1/empresas/e1");
        let err = store
            .set_document("owners/o1/empresas/e1", &named("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api { status: 403, .. }));
        assert!(store.get("owners/o1/empresas/e1").is_none());
    }
}
