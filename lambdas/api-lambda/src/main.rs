use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{run, service_fn, tracing, Error, Request};
use rice_monitor_shared::{
    config::{Config, StorageBackend},
    identity::{GoogleIdTokenVerifier, IdentityVerifier},
    s3::{BlobStore, S3BlobStore},
    store::{DocumentStore, DynamoStore, MemoryBlobStore, MemoryStore},
    AppState,
};
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config = Config::from_env();

    // Initialize service clients once at startup
    let (store, blobs): (Arc<dyn DocumentStore>, Arc<dyn BlobStore>) = match config.storage_backend
    {
        StorageBackend::Aws => {
            let aws_config = aws_config::load_from_env().await;
            (
                Arc::new(DynamoStore::new(
                    DynamoClient::new(&aws_config),
                    config.table_name.clone(),
                )),
                Arc::new(S3BlobStore::new(
                    S3Client::new(&aws_config),
                    config.storage_bucket.clone(),
                )),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, data is lost on restart");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryBlobStore::new(config.storage_bucket.clone())),
            )
        }
    };
    let identity: Arc<dyn IdentityVerifier> =
        Arc::new(GoogleIdTokenVerifier::new(config.google_client_id.clone()));

    tracing::info!(
        "Starting {} (table {}, bucket {})",
        config.project_id,
        config.table_name,
        config.storage_bucket
    );
    let state = AppState::new(config, store, blobs, identity);

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
