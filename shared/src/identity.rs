//! Google ID token verification.
//!
//! Tokens are RS256 JWTs signed with one of Google's rotating keys, published
//! as a JWK set. The set is cached for an hour and refetched early when a
//! token names a key we have not seen.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
const KEY_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Identity asserted by the external provider
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalIdentity {
    pub email: String,
    pub name: String,
    pub picture: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("malformed ID token")]
    Malformed,

    #[error("unsupported algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    #[error("unknown signing key {0}")]
    UnknownKey(String),

    #[error("signature mismatch")]
    BadSignature,

    #[error("ID token expired")]
    Expired,

    #[error("audience mismatch")]
    Audience,

    #[error("untrusted issuer")]
    Issuer,

    #[error("ID token carries no email")]
    MissingEmail,

    #[error("failed to fetch signing keys: {0}")]
    KeyFetch(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Claims we read once `iss`, `aud` and `exp` have been validated
#[derive(Debug, Deserialize)]
struct GoogleClaims {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

pub struct GoogleIdTokenVerifier {
    http: reqwest::Client,
    client_id: Option<String>,
    keys: RwLock<Option<(JwkSet, Instant)>>,
}

impl GoogleIdTokenVerifier {
    pub fn new(client_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            keys: RwLock::new(None),
        }
    }

    async fn cached_keys(&self) -> Option<JwkSet> {
        let keys = self.keys.read().await;
        match keys.as_ref() {
            Some((set, fetched_at)) if fetched_at.elapsed() < KEY_CACHE_TTL => Some(set.clone()),
            _ => None,
        }
    }

    async fn fetch_keys(&self) -> Result<JwkSet, IdentityError> {
        tracing::info!("Fetching Google signing keys");
        let set: JwkSet = self
            .http
            .get(GOOGLE_CERTS_URL)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))?;

        *self.keys.write().await = Some((set.clone(), Instant::now()));
        Ok(set)
    }
}

#[async_trait]
impl IdentityVerifier for GoogleIdTokenVerifier {
    async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
        let audience = self.client_id.as_deref();
        if audience.is_none() {
            tracing::warn!("Skipping Google ID token audience check, no client id configured");
        }

        if let Some(keys) = self.cached_keys().await {
            match verify_with_keys(token, &keys, audience) {
                Err(IdentityError::UnknownKey(kid)) => {
                    tracing::info!("Google key {} not cached, refreshing", kid);
                }
                result => return result,
            }
        }

        let keys = self.fetch_keys().await?;
        verify_with_keys(token, &keys, audience)
    }
}

/// Verify an ID token against a known key set. `audience` of `None` skips
/// the audience check.
pub fn verify_with_keys(
    token: &str,
    keys: &JwkSet,
    audience: Option<&str>,
) -> Result<ExternalIdentity, IdentityError> {
    let header = decode_header(token).map_err(|_| IdentityError::Malformed)?;
    if header.alg != Algorithm::RS256 {
        return Err(IdentityError::UnsupportedAlgorithm(header.alg));
    }
    let kid = header.kid.ok_or(IdentityError::Malformed)?;
    let jwk = keys
        .keys
        .iter()
        .find(|k| k.kid == kid)
        .ok_or(IdentityError::UnknownKey(kid))?;
    let key =
        DecodingKey::from_rsa_components(&jwk.n, &jwk.e).map_err(|_| IdentityError::Malformed)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = 0;
    validation.set_issuer(&GOOGLE_ISSUERS);
    match audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    let claims = decode::<GoogleClaims>(token, &key, &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => IdentityError::BadSignature,
            ErrorKind::ExpiredSignature => IdentityError::Expired,
            ErrorKind::InvalidAudience => IdentityError::Audience,
            ErrorKind::InvalidIssuer => IdentityError::Issuer,
            _ => IdentityError::Malformed,
        })?
        .claims;

    let email = claims
        .email
        .filter(|e| !e.is_empty())
        .ok_or(IdentityError::MissingEmail)?;

    Ok(ExternalIdentity {
        email,
        name: claims.name.unwrap_or_default(),
        picture: claims.picture.unwrap_or_default(),
    })
}
