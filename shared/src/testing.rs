//! Fixtures for unit tests: in-memory state and a verifier that trusts
//! `email:<address>` tokens.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::identity::{ExternalIdentity, IdentityError, IdentityVerifier};
use crate::store::{
    self, Collection, Document, DocumentStore, Filter, ListEdit, MemoryBlobStore, MemoryStore,
    StoreError,
};
use crate::types::{Role, User};
use crate::AppState;

pub struct StaticVerifier;

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
        let email = token.strip_prefix("email:").ok_or(IdentityError::Malformed)?;
        Ok(ExternalIdentity {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or_default().to_string(),
            picture: String::new(),
        })
    }
}

pub fn state() -> Arc<AppState> {
    state_with_blobs(Arc::new(MemoryBlobStore::new("test-bucket")))
}

pub fn state_with_blobs(blobs: Arc<MemoryBlobStore>) -> Arc<AppState> {
    state_with(Arc::new(MemoryStore::new()), blobs)
}

pub fn state_with(store: Arc<dyn DocumentStore>, blobs: Arc<MemoryBlobStore>) -> Arc<AppState> {
    let config = Config::from_lookup(|name| match name {
        "JWT_SECRET" => Some("test-secret".to_string()),
        "STORAGE_BUCKET" => Some("test-bucket".to_string()),
        "STORAGE_BACKEND" => Some("memory".to_string()),
        _ => None,
    });
    AppState::new(
        config,
        store,
        blobs,
        Arc::new(StaticVerifier),
    )
}

/// Store a user with the given id and role
pub async fn user(state: &AppState, id: &str, role: Role) -> User {
    let now = Utc::now();
    let user = User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        name: id.to_string(),
        picture: String::new(),
        role,
        created_at: now,
        updated_at: now,
        last_login_at: now,
    };
    store::save(state.store.as_ref(), Collection::Users, id, &user)
        .await
        .unwrap();
    user
}

/// Memory store whose `edit_list` calls fail with the queued errors first
#[derive(Default)]
pub struct FailingEdits {
    inner: MemoryStore,
    failures: Mutex<VecDeque<StoreError>>,
}

impl FailingEdits {
    pub fn fail_next(&self, err: StoreError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn pending(&self) -> usize {
        self.failures.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentStore for FailingEdits {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn put(&self, collection: Collection, id: &str, doc: Document) -> Result<(), StoreError> {
        self.inner.put(collection, id, doc).await
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        doc: Document,
    ) -> Result<bool, StoreError> {
        self.inner.insert(collection, id, doc).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.inner.delete(collection, id).await
    }

    async fn query(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.query(collection, filter).await
    }

    async fn edit_list(
        &self,
        collection: Collection,
        id: &str,
        attribute: &str,
        edit: ListEdit,
        updated_at: DateTime<Utc>,
    ) -> Result<Document, StoreError> {
        let failure = self.failures.lock().unwrap().pop_front();
        match failure {
            Some(err) => Err(err),
            None => {
                self.inner
                    .edit_list(collection, id, attribute, edit, updated_at)
                    .await
            }
        }
    }
}
