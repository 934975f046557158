pub mod analytics;
pub mod auth;
pub mod config;
pub mod error;
pub mod fields;
pub mod identity;
pub mod images;
pub mod policy;
pub mod response;
pub mod s3;
pub mod store;
pub mod submissions;
pub mod tokens;
pub mod types;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;

use config::Config;
use identity::IdentityVerifier;
use s3::BlobStore;
use std::sync::Arc;
use store::DocumentStore;
use tokens::TokenService;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub tokens: TokenService,
    pub identity: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Arc<Self> {
        let tokens = TokenService::new(&config.jwt_secret);
        Arc::new(Self {
            config,
            store,
            blobs,
            tokens,
            identity,
        })
    }
}
