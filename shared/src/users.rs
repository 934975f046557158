use chrono::Utc;

use crate::error::ApiError;
use crate::identity::ExternalIdentity;
use crate::policy::{self, Action, Resource};
use crate::store::{self, Collection, Filter};
use crate::types::{Role, User, UserPatch};
use crate::AppState;

/// Find the user registered under the identity's email, creating an observer
/// on first sight, and stamp the login time.
///
/// New users are created behind an email claim in `UserEmails`, so
/// concurrent first logins agree on a single user.
pub async fn resolve_or_create(
    state: &AppState,
    identity: ExternalIdentity,
) -> Result<User, ApiError> {
    let docs = state.store.as_ref();
    let now = Utc::now();

    let existing: Vec<User> = store::load_all(
        docs,
        Collection::Users,
        &Filter::new().eq("email", identity.email.clone()),
    )
    .await?;

    let mut user = match existing.into_iter().next() {
        Some(user) => user,
        None => {
            let user = User {
                id: uuid::Uuid::new_v4().to_string(),
                email: identity.email,
                name: identity.name,
                picture: identity.picture,
                role: Role::Observer,
                created_at: now,
                updated_at: now,
                last_login_at: now,
            };
            match claim_email(state, &user).await? {
                None => {
                    store::save(docs, Collection::Users, &user.id, &user).await?;
                    tracing::info!("Created user {} for {}", user.id, user.email);
                    return Ok(user);
                }
                Some(winner) => winner,
            }
        }
    };

    // A missed login stamp is not worth failing the login for
    let mut stamp = store::Document::new();
    stamp.insert("last_login_at".to_string(), serde_json::to_value(now)?);
    if let Err(e) = docs.update(Collection::Users, &user.id, stamp).await {
        tracing::warn!("Failed to update last login for {}: {}", user.id, e);
    }
    user.last_login_at = now;

    Ok(user)
}

/// Claim the user's email. Returns the user that already holds it when the
/// claim is lost.
async fn claim_email(state: &AppState, user: &User) -> Result<Option<User>, ApiError> {
    let docs = state.store.as_ref();
    if docs
        .insert(Collection::UserEmails, &user.email, store::to_document(user)?)
        .await?
    {
        return Ok(None);
    }

    // The claim carries the winner as created; prefer the saved record
    let claimed: User = store::load(docs, Collection::UserEmails, &user.email)
        .await?
        .ok_or_else(|| ApiError::Internal("Email claim disappeared".to_string()))?;
    let winner = store::load(docs, Collection::Users, &claimed.id)
        .await?
        .unwrap_or(claimed);

    tracing::info!("Concurrent first login for {}, using user {}", user.email, winner.id);
    Ok(Some(winner))
}

/// Every user, newest first. Admin only.
pub async fn list_users(state: &AppState, principal: &User) -> Result<Vec<User>, ApiError> {
    policy::require_admin(principal)?;

    let mut users: Vec<User> =
        store::load_all(state.store.as_ref(), Collection::Users, &Filter::new()).await?;
    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(users)
}

pub async fn get_user(state: &AppState, principal: &User, id: &str) -> Result<User, ApiError> {
    policy::authorize(principal, Resource::User, Action::Read, id)?;
    find(state, id).await
}

pub async fn update_user(
    state: &AppState,
    principal: &User,
    id: &str,
    patch: UserPatch,
) -> Result<User, ApiError> {
    policy::authorize(principal, Resource::User, Action::Write, id)?;
    if patch.role.is_some() && !principal.is_admin() {
        return Err(ApiError::Forbidden("Only admins can change roles".to_string()));
    }
    find(state, id).await?;

    let mut fields = store::to_document(&patch)?;
    fields.insert("updated_at".to_string(), serde_json::to_value(Utc::now())?);
    state.store.update(Collection::Users, id, fields).await?;

    tracing::info!("User {} updated by {}", id, principal.id);
    find(state, id).await
}

pub async fn delete_user(state: &AppState, principal: &User, id: &str) -> Result<(), ApiError> {
    policy::authorize(principal, Resource::User, Action::Delete, id)?;
    if principal.id == id {
        return Err(ApiError::InvalidRequest(
            "Cannot delete your own account".to_string(),
        ));
    }
    let user = find(state, id).await?;

    state.store.delete(Collection::Users, id).await?;
    // Frees the email for a new registration
    state.store.delete(Collection::UserEmails, &user.email).await?;
    tracing::info!("User {} deleted by {}", id, principal.id);
    Ok(())
}

async fn find(state: &AppState, id: &str) -> Result<User, ApiError> {
    store::load(state.store.as_ref(), Collection::Users, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}
