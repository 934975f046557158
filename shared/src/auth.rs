use lambda_http::http::HeaderMap;

use crate::error::ApiError;
use crate::store::{self, Collection};
use crate::tokens::{TokenType, ACCESS_TOKEN_TTL_SECS};
use crate::types::{AuthResponse, GoogleTokenRequest, RefreshTokenRequest, User};
use crate::users;
use crate::AppState;

/// Resolve the caller of a protected route from its bearer access token.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let header = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Authorization header required".to_string()))?;

    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Bearer token required".to_string()))?;

    let claims = state
        .tokens
        .validate(token, TokenType::Access)
        .map_err(|e| {
            tracing::debug!("Rejected access token: {}", e);
            ApiError::Unauthorized("Invalid token".to_string())
        })?;

    store::load::<User>(state.store.as_ref(), Collection::Users, &claims.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))
}

/// Exchange a Google ID token for a session, creating the user on first
/// login.
pub async fn google_login(
    state: &AppState,
    request: GoogleTokenRequest,
) -> Result<AuthResponse, ApiError> {
    if request.token.trim().is_empty() {
        return Err(ApiError::InvalidRequest("token is required".to_string()));
    }

    let identity = state.identity.verify(&request.token).await?;
    let user = users::resolve_or_create(state, identity).await?;
    tracing::info!("User {} logged in", user.id);

    session(state, user)
}

pub async fn refresh(
    state: &AppState,
    request: RefreshTokenRequest,
) -> Result<AuthResponse, ApiError> {
    let claims = state
        .tokens
        .validate(&request.refresh_token, TokenType::Refresh)?;

    let user = store::load::<User>(state.store.as_ref(), Collection::Users, &claims.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

    session(state, user)
}

/// Tokens are stateless, so there is nothing to revoke; the client drops them.
pub fn logout(user: &User) -> &'static str {
    tracing::info!("User {} logged out", user.id);
    "Logged out successfully"
}

fn session(state: &AppState, user: User) -> Result<AuthResponse, ApiError> {
    let pair = state.tokens.issue(&user)?;
    Ok(AuthResponse {
        user,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_in: ACCESS_TOKEN_TTL_SECS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::types::Role;
    use lambda_http::http::HeaderValue;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_google_login_creates_observer_once() {
        let state = testing::state();

        let first = google_login(
            &state,
            GoogleTokenRequest {
                token: "email:a@example.com".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(first.user.email, "a@example.com");
        assert_eq!(first.user.role, Role::Observer);
        assert_eq!(first.expires_in, 3600);

        let second = google_login(
            &state,
            GoogleTokenRequest {
                token: "email:a@example.com".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(second.user.id, first.user.id);
    }

    #[tokio::test]
    async fn test_google_login_rejects_bad_assertion() {
        let state = testing::state();
        let err = google_login(
            &state,
            GoogleTokenRequest {
                token: "garbage".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_token");
    }

    #[tokio::test]
    async fn test_gate() {
        let state = testing::state();
        let user = testing::user(&state, "u1", Role::Researcher).await;
        let pair = state.tokens.issue(&user).unwrap();

        let resolved = authenticate(&state, &bearer(&pair.access_token)).await.unwrap();
        assert_eq!(resolved.id, "u1");

        let err = authenticate(&state, &HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Authorization header required");

        let mut basic = HeaderMap::new();
        basic.insert("Authorization", HeaderValue::from_static("Basic abc"));
        let err = authenticate(&state, &basic).await.unwrap_err();
        assert_eq!(err.to_string(), "Bearer token required");

        let err = authenticate(&state, &bearer(&pair.refresh_token)).await.unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
        assert_eq!(err.status().as_u16(), 401);
    }

    #[tokio::test]
    async fn test_gate_rejects_deleted_user() {
        let state = testing::state();
        let user = testing::user(&state, "u1", Role::Observer).await;
        let pair = state.tokens.issue(&user).unwrap();
        state.store.delete(Collection::Users, "u1").await.unwrap();

        let err = authenticate(&state, &bearer(&pair.access_token)).await.unwrap_err();
        assert_eq!(err.to_string(), "User not found");
    }

    #[tokio::test]
    async fn test_refresh_issues_new_session() {
        let state = testing::state();
        let user = testing::user(&state, "u1", Role::Observer).await;
        let pair = state.tokens.issue(&user).unwrap();

        let session = refresh(
            &state,
            RefreshTokenRequest {
                refresh_token: pair.refresh_token,
            },
        )
        .await
        .unwrap();
        assert_eq!(session.user.id, "u1");
        assert!(authenticate(&state, &bearer(&session.access_token)).await.is_ok());

        let err = refresh(
            &state,
            RefreshTokenRequest {
                refresh_token: pair.access_token,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_token");
    }
}
