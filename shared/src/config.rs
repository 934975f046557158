use std::env;

const DEFAULT_PROJECT_ID: &str = "rice-monitor-dev";
const DEFAULT_BUCKET: &str = "rice-monitor-images-dev";
const DEFAULT_JWT_SECRET: &str = "your-secret-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Aws,
    Memory,
}

/// Runtime configuration, read once at cold start
#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    pub table_name: String,
    pub storage_bucket: String,
    pub jwt_secret: String,
    pub google_client_id: Option<String>,
    pub storage_backend: StorageBackend,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from any variable lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let project_id = get("PROJECT_ID").unwrap_or_else(|| {
            tracing::info!("PROJECT_ID not set, using {}", DEFAULT_PROJECT_ID);
            DEFAULT_PROJECT_ID.to_string()
        });
        let table_name = get("TABLE_NAME").unwrap_or_else(|| project_id.clone());
        let storage_bucket = get("STORAGE_BUCKET").unwrap_or_else(|| {
            tracing::info!("STORAGE_BUCKET not set, using {}", DEFAULT_BUCKET);
            DEFAULT_BUCKET.to_string()
        });
        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set, falling back to the development secret");
            DEFAULT_JWT_SECRET.to_string()
        });
        let google_client_id = get("GOOGLE_CLIENT_ID");
        if google_client_id.is_none() {
            tracing::warn!("GOOGLE_CLIENT_ID not set, Google ID token audience will not be checked");
        }
        let storage_backend = match get("STORAGE_BACKEND").as_deref() {
            Some(v) if v.eq_ignore_ascii_case("memory") => StorageBackend::Memory,
            Some(v) if !v.eq_ignore_ascii_case("aws") => {
                tracing::warn!("Unknown STORAGE_BACKEND {}, using aws", v);
                StorageBackend::Aws
            }
            _ => StorageBackend::Aws,
        };

        Self {
            project_id,
            table_name,
            storage_bucket,
            jwt_secret,
            google_client_id,
            storage_backend,
        }
    }
}
