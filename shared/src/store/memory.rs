use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Collection, Document, DocumentStore, Filter, ListEdit, StoreError};
use crate::s3::{public_url, BlobError, BlobStore};

/// Process-local document store for tests and `STORAGE_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<(Collection, String), Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.get(&(collection, id.to_string())).cloned())
    }

    async fn put(&self, collection: Collection, id: &str, doc: Document) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        docs.insert((collection, id.to_string()), doc);
        Ok(())
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        doc: Document,
    ) -> Result<bool, StoreError> {
        let mut docs = self.docs.write().await;
        match docs.entry((collection, id.to_string())) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(doc);
                Ok(true)
            }
        }
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let doc = docs
            .get_mut(&(collection, id.to_string()))
            .ok_or(StoreError::NotFound)?;
        doc.extend(fields);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        docs.remove(&(collection, id.to_string()));
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .iter()
            .filter(|((c, _), doc)| *c == collection && filter.matches(doc))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn edit_list(
        &self,
        collection: Collection,
        id: &str,
        attribute: &str,
        edit: ListEdit,
        updated_at: DateTime<Utc>,
    ) -> Result<Document, StoreError> {
        let mut docs = self.docs.write().await;
        let doc = docs
            .get_mut(&(collection, id.to_string()))
            .ok_or(StoreError::NotFound)?;

        let mut items = match doc.remove(attribute) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        match edit {
            ListEdit::Append(value) => items.push(value),
            ListEdit::Remove(value) => items.retain(|item| item != &value),
        }
        doc.insert(attribute.to_string(), Value::Array(items));
        doc.insert("updated_at".to_string(), serde_json::to_value(updated_at)?);

        Ok(doc.clone())
    }
}

/// Blob store that keeps objects in memory and hands out URLs in the same
/// shape as S3.
pub struct MemoryBlobStore {
    bucket: String,
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlobError> {
        let mut objects = self.objects.write().await;
        objects.insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let mut objects = self.objects.write().await;
        objects.remove(key);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_url(&self.bucket, key)
    }
}
