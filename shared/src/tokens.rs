//! HS256 session tokens.
//!
//! Access tokens live for an hour and authenticate API calls; refresh tokens
//! live for a week and can only be exchanged for a new pair.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Role, User};

pub const ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("wrong token type")]
    WrongType,

    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,

    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidAlgorithm => TokenError::UnsupportedAlgorithm,
            _ => TokenError::Malformed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, user: &User) -> Result<TokenPair, TokenError> {
        self.issue_at(user, Utc::now())
    }

    pub fn issue_at(&self, user: &User, now: DateTime<Utc>) -> Result<TokenPair, TokenError> {
        let claims = |token_type: TokenType, ttl: i64| Claims {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            token_type,
            iat: now.timestamp(),
            exp: now.timestamp() + ttl,
        };

        Ok(TokenPair {
            access_token: self.sign(&claims(TokenType::Access, ACCESS_TOKEN_TTL_SECS))?,
            refresh_token: self.sign(&claims(TokenType::Refresh, REFRESH_TOKEN_TTL_SECS))?,
        })
    }

    /// Check signature, algorithm and expiry, then that the token is of the
    /// expected type.
    pub fn validate(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims;
        if claims.token_type != expected {
            return Err(TokenError::WrongType);
        }
        Ok(claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}
