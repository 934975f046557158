//! Document store seam.
//!
//! Entities are stored as JSON documents grouped in collections. The DynamoDB
//! implementation keeps everything in one table; the in-memory one backs
//! tests and local development.

pub mod dynamo;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use dynamo::DynamoStore;
pub use memory::{MemoryBlobStore, MemoryStore};

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Fields,
    Submissions,
    /// One item per registered email, guarding against duplicate users
    UserEmails,
}

impl Collection {
    /// Partition key shared by every item of the collection
    pub fn partition(&self) -> &'static str {
        match self {
            Collection::Users => "USERS",
            Collection::Fields => "FIELDS",
            Collection::Submissions => "SUBMISSIONS",
            Collection::UserEmails => "USER_EMAILS",
        }
    }

    /// Sort key of a single item
    pub fn sort_key(&self, id: &str) -> String {
        match self {
            Collection::Users => format!("USER#{}", id),
            Collection::Fields => format!("FIELD#{}", id),
            Collection::Submissions => format!("SUBMISSION#{}", id),
            Collection::UserEmails => format!("EMAIL#{}", id),
        }
    }
}

/// Equality predicates ANDed together. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub equals: Vec<(String, String)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<String>) -> Self {
        self.equals.push((field.to_string(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.equals
            .iter()
            .all(|(field, value)| doc.get(field).and_then(Value::as_str) == Some(value.as_str()))
    }
}

/// Edit applied to a list-valued attribute together with `updated_at`.
#[derive(Debug, Clone, PartialEq)]
pub enum ListEdit {
    Append(Value),
    Remove(Value),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    #[error("document was modified concurrently")]
    Conflict,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    /// Write the full document, replacing any previous version.
    async fn put(&self, collection: Collection, id: &str, doc: Document) -> Result<(), StoreError>;

    /// Write the document unless one already exists under the id. Returns
    /// `false`, leaving the stored one untouched, when it does.
    async fn insert(&self, collection: Collection, id: &str, doc: Document)
        -> Result<bool, StoreError>;

    /// Write only the given top-level attributes. Fails with `NotFound` when
    /// the document does not exist.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    /// Every document of the collection matching the filter, in no
    /// particular order.
    async fn query(&self, collection: Collection, filter: &Filter)
        -> Result<Vec<Document>, StoreError>;

    /// Atomically edit a list attribute and stamp `updated_at`, returning the
    /// document as written.
    async fn edit_list(
        &self,
        collection: Collection,
        id: &str,
        attribute: &str,
        edit: ListEdit,
        updated_at: DateTime<Utc>,
    ) -> Result<Document, StoreError>;
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Codec(format!("expected an object, got {}", other))),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Fetch and decode a single document
pub async fn load<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
    id: &str,
) -> Result<Option<T>, StoreError> {
    store
        .get(collection, id)
        .await?
        .map(from_document)
        .transpose()
}

/// Query and decode every matching document
pub async fn load_all<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
    filter: &Filter,
) -> Result<Vec<T>, StoreError> {
    store
        .query(collection, filter)
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

pub async fn save<T: Serialize>(
    store: &dyn DocumentStore,
    collection: Collection,
    id: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.put(collection, id, to_document(value)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_all_predicates() {
        let doc = to_document(&json!({"user_id": "u1", "status": "submitted"})).unwrap();

        assert!(Filter::new().matches(&doc));
        assert!(Filter::new().eq("user_id", "u1").matches(&doc));
        assert!(Filter::new()
            .eq("user_id", "u1")
            .eq("status", "submitted")
            .matches(&doc));
        assert!(!Filter::new().eq("user_id", "u1").eq("status", "approved").matches(&doc));
        assert!(!Filter::new().eq("field_id", "f1").matches(&doc));
    }

    #[test]
    fn test_keys() {
        assert_eq!(Collection::Submissions.partition(), "SUBMISSIONS");
        assert_eq!(Collection::Fields.sort_key("abc"), "FIELD#abc");
    }
}
